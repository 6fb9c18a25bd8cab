//! Application settings and Telegram configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default location of the remote deny-list.
pub const DEFAULT_BLACKLIST_URL: &str =
    "https://raw.githubusercontent.com/kastaid/resources/main/kastablacklist.py";

/// Telegram API configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Serialized string session, if configured.
    #[serde(default)]
    pub string_session: Option<String>,

    /// Bot token; when set the client signs in as a bot.
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Path to the MTProto session database.
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,

    /// Where the string session is written back after a DC fix.
    #[serde(default = "default_session_string_path")]
    pub session_string_path: PathBuf,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("session.db")
}

fn default_session_string_path() -> PathBuf {
    PathBuf::from("session.string")
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String) -> Self {
        Self {
            api_id,
            api_hash,
            string_session: None,
            bot_token: None,
            session_path: default_session_path(),
            session_string_path: default_session_string_path(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID` and `TG_API_HASH` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_id: i32 = lookup("TG_API_ID")
            .ok_or(ConfigError::MissingEnvVar("TG_API_ID"))?
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidApiId)?;

        let api_hash = lookup("TG_API_HASH").ok_or(ConfigError::MissingEnvVar("TG_API_HASH"))?;

        Ok(Self {
            api_id,
            api_hash,
            string_session: lookup("STRING_SESSION").filter(|s| !s.trim().is_empty()),
            bot_token: lookup("BOT_TOKEN").filter(|s| !s.trim().is_empty()),
            session_path: lookup("TG_SESSION_PATH").map_or_else(default_session_path, PathBuf::from),
            session_string_path: lookup("TG_SESSION_STRING_PATH")
                .map_or_else(default_session_string_path, PathBuf::from),
        })
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_id", &self.api_id)
            .field("session_path", &self.session_path)
            .field("has_string_session", &self.string_session.is_some())
            .field("has_bot_token", &self.bot_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Bot-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Command prefix for built-in commands.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Root directory scanned for plugin manifests.
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,

    /// Path of the key-value store file.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Remote deny-list location.
    #[serde(default = "default_blacklist_url")]
    pub blacklist_url: String,

    /// How many times the deny-list fetch is attempted.
    #[serde(default = "default_blacklist_attempts")]
    pub blacklist_attempts: u32,

    /// Accounts that skip the deny-list check entirely.
    #[serde(default)]
    pub developer_ids: Vec<i64>,
}

fn default_command_prefix() -> String {
    ".".to_owned()
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_store_path() -> PathBuf {
    PathBuf::from("store.json")
}

fn default_blacklist_url() -> String {
    DEFAULT_BLACKLIST_URL.to_owned()
}

fn default_blacklist_attempts() -> u32 {
    6
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
            plugins_dir: default_plugins_dir(),
            store_path: default_store_path(),
            blacklist_url: default_blacklist_url(),
            blacklist_attempts: default_blacklist_attempts(),
            developer_ids: Vec::new(),
        }
    }
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self::from_lookup_with_defaults(|key| std::env::var(key).ok())
    }

    /// Creates bot settings from an arbitrary key lookup with defaults.
    #[must_use]
    pub fn from_lookup_with_defaults(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            command_prefix: lookup("COMMAND_PREFIX")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(default_command_prefix),
            plugins_dir: lookup("PLUGINS_DIR").map_or_else(default_plugins_dir, PathBuf::from),
            store_path: lookup("STORE_PATH").map_or_else(default_store_path, PathBuf::from),
            blacklist_url: lookup("BLACKLIST_URL").unwrap_or_else(default_blacklist_url),
            blacklist_attempts: lookup("BLACKLIST_ATTEMPTS")
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or_else(default_blacklist_attempts),
            developer_ids: lookup("DEV_IDS")
                .map(|s| parse_id_list(&s))
                .unwrap_or_default(),
        }
    }
}

/// Parses a comma or whitespace separated list of ids, skipping junk.
fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,
}
