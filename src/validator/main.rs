//! Standalone validator for plugin manifests.
//!
//! Checks every plugin file under a plugins root the same way the userbot
//! loads them: the JSON must parse, every pattern must compile and every
//! handler must do something.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use userbot::plugins::{PluginManifest, PluginRegistry};

/// Plugin manifest validator.
#[derive(Parser, Debug)]
#[command(name = "validate_plugins")]
#[command(about = "Validates plugin manifests for the Telegram userbot")]
#[command(version)]
struct Args {
    /// Plugins root directory to scan.
    #[arg(short, long, default_value = "plugins")]
    dir: PathBuf,

    /// Validate a single manifest instead of scanning a directory.
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Show every handler of each plugin.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let files = match args.file {
        Some(file) => vec![file],
        None => {
            println!("Scanning: {}", args.dir.display());
            PluginRegistry::new(&args.dir).plugin_files()
        }
    };

    if files.is_empty() {
        println!("No plugins found.");
        return ExitCode::SUCCESS;
    }

    let errors = files
        .iter()
        .filter(|path| !validate_plugin(path, args.verbose))
        .count();

    println!();

    let total = files.len();
    if errors == 0 {
        println!("✓ All {total} plugins are valid!");
        ExitCode::SUCCESS
    } else {
        println!("✗ Validation failed: {errors} of {total} plugins");
        ExitCode::FAILURE
    }
}

fn validate_plugin(path: &Path, verbose: bool) -> bool {
    let manifest = match PluginManifest::load(path) {
        Ok(m) => m,
        Err(e) => {
            println!("✗ {}: {e}", path.display());
            return false;
        }
    };

    if let Err(e) = manifest.build() {
        println!("✗ {}: {e}", path.display());
        return false;
    }

    println!(
        "✓ {} ({} handlers){}",
        path.display(),
        manifest.handlers.len(),
        manifest
            .description
            .as_deref()
            .map(|d| format!(" - {}", truncate(d, 50)))
            .unwrap_or_default()
    );

    if verbose {
        for (i, spec) in manifest.handlers.iter().enumerate() {
            let direction = match (spec.outgoing, spec.incoming) {
                (true, true) => "both",
                (true, false) => "outgoing",
                _ => "incoming",
            };
            println!(
                "  [{i}] {} ({direction}){}",
                spec.pattern.as_deref().unwrap_or("<any>"),
                if spec.stop { " stop" } else { "" }
            );
        }
    }

    true
}

/// Truncates a string for display.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
