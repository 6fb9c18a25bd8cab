//! Plugin discovery, loading and unloading.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::handler::{EventFilter, Handler, MessageEvent};
use super::manifest::PluginManifest;
use super::table::{HandlerId, HandlerTable};

/// File extension of plugin manifests.
pub const PLUGIN_EXTENSION: &str = "json";

/// Subdirectory of the plugins root that `load` resolves names in.
pub const CUSTOM_DIR: &str = "custom";

/// File name suffixes that are never listed.
const EXCLUDED_SUFFIXES: [&str; 2] = ["__.json", "_draft.json"];

/// Errors raised while loading or unloading plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Invalid plugin name: {0:?}")]
    InvalidName(String),

    #[error("Plugin {0} is not loaded")]
    NotLoaded(String),

    #[error("Failed to read plugin {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plugin {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Handler {index} has an invalid pattern: {source}")]
    Pattern {
        index: usize,
        #[source]
        source: regex::Error,
    },

    #[error("Handler {index} neither replies nor stops propagation")]
    EmptyHandler { index: usize },

    #[error("Handler {index} listens to neither incoming nor outgoing messages")]
    NoDirection { index: usize },
}

/// A plugin file found under the plugins root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEntry {
    /// Parent directory and stem joined with a dot, e.g. `custom.ping`.
    pub path: String,
    /// File stem, e.g. `ping`.
    pub name: String,
}

/// A loaded plugin.
#[derive(Debug, Clone)]
pub struct PluginHandle {
    pub name: String,
    pub module: String,
    pub path: PathBuf,
    pub description: Option<String>,
    pub handlers: usize,
}

/// Loaded plugins and the handler table they register into.
#[derive(Debug)]
pub struct PluginRegistry {
    root: PathBuf,
    table: RwLock<HandlerTable>,
    plugins: RwLock<HashMap<String, PluginHandle>>,
}

impl PluginRegistry {
    /// Creates an empty registry rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            table: RwLock::new(HandlerTable::new()),
            plugins: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registers a handler unless the same callback is already registered.
    pub async fn add_handler(
        &self,
        owner: &str,
        filter: EventFilter,
        callback: Arc<dyn Handler>,
    ) -> Option<HandlerId> {
        let id = self.table.write().await.add(owner, filter, callback);
        if id.is_none() {
            debug!("Handler for {} already registered, skipping", owner);
        }
        id
    }

    /// Loads the named plugin from the custom directory.
    ///
    /// Returns whether the plugin is now loaded; failures are logged.
    pub async fn load(&self, name: &str) -> bool {
        match self.resolve(name) {
            Ok(path) => self.load_path(&path).await,
            Err(e) => {
                warn!("Failed to load custom plugin {}!", name);
                error!("{}", e);
                false
            }
        }
    }

    /// Loads a plugin file located anywhere under the root.
    pub async fn load_path(&self, path: &Path) -> bool {
        let name = file_stem(path);
        match self.try_load(path, &name).await {
            Ok(handle) => {
                info!(
                    "Successfully loaded plugin {} ({} handlers)",
                    handle.name, handle.handlers
                );
                true
            }
            Err(e) => {
                warn!("Failed to load plugin {}!", name);
                error!("{}", e);
                false
            }
        }
    }

    async fn try_load(&self, path: &Path, name: &str) -> Result<PluginHandle, PluginError> {
        if name.is_empty() {
            return Err(PluginError::InvalidName(path.display().to_string()));
        }

        let manifest = PluginManifest::load(path)?;
        let handlers = manifest.build()?;

        if self.plugins.read().await.contains_key(name) {
            debug!("Plugin {} already loaded, replacing it", name);
            self.unload(name).await?;
        }

        let module = self.module_identity(path);
        let registered = {
            let mut table = self.table.write().await;
            handlers
                .into_iter()
                .filter_map(|(filter, callback)| table.add(&module, filter, callback))
                .count()
        };

        let handle = PluginHandle {
            name: name.to_owned(),
            module,
            path: path.to_path_buf(),
            description: manifest.description,
            handlers: registered,
        };
        self.plugins
            .write()
            .await
            .insert(name.to_owned(), handle.clone());
        Ok(handle)
    }

    /// Removes a plugin and every handler it registered.
    pub async fn unload(&self, name: &str) -> Result<usize, PluginError> {
        let name = plugin_name(name);
        let mut plugins = self.plugins.write().await;
        let handle = plugins
            .remove(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_owned()))?;

        let removed = self.table.write().await.remove_owner(&handle.module);
        info!("Removed plugin {} ({} handlers)", name, removed);
        Ok(removed)
    }

    /// Lists plugin files under the root, recursively.
    #[must_use]
    pub fn all_plugins(&self) -> Vec<PluginEntry> {
        let mut entries: Vec<PluginEntry> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|p| is_listed(p))
            .map(|p| PluginEntry {
                path: dotted_path(&p),
                name: file_stem(&p),
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// Loads every listed plugin; returns how many succeeded.
    ///
    /// Plugins are keyed by file stem, so only the first file (in path
    /// order) of each stem is loaded.
    pub async fn load_all(&self) -> usize {
        let mut loaded = 0;
        let mut seen = HashSet::new();
        for path in self.plugin_files() {
            let name = file_stem(&path);
            if !seen.insert(name.clone()) {
                warn!(
                    "Skipping {}: another plugin named {} was found first",
                    path.display(),
                    name
                );
                continue;
            }
            if self.load_path(&path).await {
                loaded += 1;
            }
        }
        loaded
    }

    /// Paths of every listed plugin file, sorted.
    #[must_use]
    pub fn plugin_files(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|p| is_listed(p))
            .collect();
        paths.sort();
        paths
    }

    /// Names of loaded plugins, sorted.
    pub async fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Details of a loaded plugin.
    pub async fn get(&self, name: &str) -> Option<PluginHandle> {
        self.plugins.read().await.get(name).cloned()
    }

    /// Callbacks accepting `event`, newest first.
    pub async fn matching(&self, event: &MessageEvent) -> Vec<Arc<dyn Handler>> {
        self.table.read().await.matching(event)
    }

    /// Handler ids and their owners in dispatch order (newest first).
    pub async fn handlers(&self) -> Vec<(HandlerId, String)> {
        self.table
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id, entry.owner.clone()))
            .collect()
    }

    /// Total number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.table.read().await.len()
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, PluginError> {
        let stem = plugin_name(name);
        if stem.is_empty() || stem.contains(['/', '\\']) || stem.starts_with('.') {
            return Err(PluginError::InvalidName(name.to_owned()));
        }
        Ok(self
            .root
            .join(CUSTOM_DIR)
            .join(format!("{stem}.{PLUGIN_EXTENSION}")))
    }

    /// `plugins.<dirs relative to root>.<stem>`; unique per file.
    fn module_identity(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let mut parts = vec!["plugins".to_owned()];
        if let Some(parent) = relative.parent() {
            parts.extend(
                parent
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned()),
            );
        }
        parts.push(file_stem(path));
        parts.join(".")
    }
}

/// Registry key for a user-supplied name: trimmed, extension dropped.
fn plugin_name(name: &str) -> &str {
    let trimmed = name.trim();
    trimmed
        .strip_suffix(PLUGIN_EXTENSION)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(trimmed)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_listed(path: &Path) -> bool {
    let Some(file_name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    path.extension().is_some_and(|ext| ext == PLUGIN_EXTENSION)
        && !EXCLUDED_SUFFIXES.iter().any(|s| file_name.ends_with(s))
}

fn dotted_path(path: &Path) -> String {
    let parent = path
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned());
    let stem = file_stem(path);
    match parent {
        Some(parent) => format!("{parent}.{stem}"),
        None => stem,
    }
}
