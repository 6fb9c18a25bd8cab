//! Small key-value store persisted as a JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors from writing the store file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to serialize store: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write store file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A stored value and when it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// JSON-file backed key-value store.
///
/// Every mutation is written through to disk.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl Store {
    /// Opens the store at `path`, starting empty if the file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::load(&path);
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn load(path: &Path) -> BTreeMap<String, Entry> {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return BTreeMap::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Ignoring unreadable store {}: {}", path.display(), e);
            BTreeMap::new()
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sets `key` and persists the store.
    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<(), StoreError> {
        let mut entries = self.lock();
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.into(),
                updated_at: Utc::now(),
            },
        );
        self.persist(&entries)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Entry> {
        self.lock().get(key).cloned()
    }

    /// Removes `key`, returning what it held.
    pub fn take(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        let mut entries = self.lock();
        let Some(entry) = entries.remove(key) else {
            return Ok(None);
        };
        self.persist(&entries)?;
        Ok(Some(entry))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &BTreeMap<String, Entry>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
