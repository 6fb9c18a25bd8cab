//! Userbot - Main Entry Point
//!
//! Validates the session, signs in, loads plugins and dispatches messages
//! until the connection ends or a restart is requested.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use userbot::blacklist::{BlacklistFetcher, HttpFetcher};
use userbot::bootstrap::{BlacklistPolicy, Bootstrap};
use userbot::commands::{CORE_OWNER, CommandHandler};
use userbot::config::{BotSettings, TelegramConfig};
use userbot::plugins::{Dispatcher, EventFilter, PluginRegistry};
use userbot::session::StringSession;
use userbot::supervisor::{Launch, Store, Supervisor};
use userbot::telegram::{Credential, GrammersTransport, Shutdown, Transport, TransportPolicy};

/// Telegram userbot with hot-loadable plugins.
#[derive(Parser, Debug)]
#[command(name = "userbot")]
#[command(about = "Telegram userbot with hot-loadable command plugins")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Skip loading plugins from the plugins directory at startup.
    #[arg(long)]
    no_autoload: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    // Load configurations
    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;
    let bot_settings = BotSettings::from_env_with_defaults();

    let session = match StringSession::resolve(
        &tg_config.session_string_path,
        tg_config.string_session.as_deref(),
    ) {
        Ok(session) => session,
        Err(e) => {
            error!("{}", e);
            return Ok(exit_code(e.exit_code()));
        }
    };

    let transport: Arc<dyn Transport> = Arc::new(
        GrammersTransport::connect(&tg_config, session, TransportPolicy::default())
            .await
            .context("Failed to connect to Telegram")?,
    );
    let supervisor = Supervisor::new(
        Arc::clone(&transport),
        Store::open(&bot_settings.store_path),
        Launch::current().context("Failed to determine the running executable")?,
    );

    let blacklist = BlacklistFetcher::new(Arc::new(
        HttpFetcher::new().context("Failed to build HTTP client")?,
    ));
    let mut bootstrap = Bootstrap::new(
        Arc::clone(&transport),
        Arc::new(blacklist),
        BlacklistPolicy::from_settings(&bot_settings),
    );

    let ready = match bootstrap.run(&credential(&tg_config)).await {
        Ok(ready) => ready,
        Err(e) => {
            transport.disconnect();
            return Ok(exit_code(e.exit_code()));
        }
    };
    let started_at = Instant::now();

    if let Some(pending) = supervisor.take_reboot_marker() {
        debug!("Previous process asked for a reboot at {}", pending.requested_at);
    }

    let registry = Arc::new(PluginRegistry::new(&bot_settings.plugins_dir));
    registry
        .add_handler(
            CORE_OWNER,
            EventFilter::any().outgoing_only(),
            Arc::new(CommandHandler::new(bot_settings.command_prefix.clone())),
        )
        .await;

    if args.no_autoload {
        info!("Plugin autoload disabled");
    } else {
        let loaded = registry.load_all().await;
        info!(
            "Loaded {} plugin(s) from {}",
            loaded,
            bot_settings.plugins_dir.display()
        );
    }

    let dispatcher = Dispatcher::new(Arc::clone(&registry), ready.identity, started_at);

    info!("Command prefix: {}", bot_settings.command_prefix);
    info!("Userbot is running. Use Ctrl+C to stop.");

    let shutdown = tokio::select! {
        result = transport.run_until_disconnected(&dispatcher) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(Shutdown::Disconnected)
        }
    };

    match shutdown {
        Ok(Shutdown::Disconnected) => {
            info!("Shutting down...");
            transport.disconnect();
            Ok(ExitCode::SUCCESS)
        }
        Ok(Shutdown::Reboot(request)) => {
            let err = supervisor.reboot(request);
            Err(err).context("Failed to relaunch after reboot request")
        }
        Err(e) if e.requires_restart() => {
            let err = supervisor.restart(&e.to_string());
            Err(err).context("Failed to relaunch after transport corruption")
        }
        Err(e) => {
            error!("Connection lost: {}", e);
            transport.disconnect();
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Signs in as a bot when a token is configured.
fn credential(config: &TelegramConfig) -> Credential {
    config
        .bot_token
        .as_ref()
        .filter(|token| !token.trim().is_empty())
        .map_or(Credential::Session, |token| Credential::BotToken(token.clone()))
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
