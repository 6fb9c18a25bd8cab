//! Configuration module for the userbot.
//!
//! Handles loading Telegram API credentials and bot settings
//! from the environment.

mod settings;

pub use settings::{BotSettings, ConfigError, DEFAULT_BLACKLIST_URL, TelegramConfig};
