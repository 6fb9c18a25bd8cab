//! Userbot Library
//!
//! A Telegram userbot with hot-loadable plugins.
//!
//! This crate provides the core functionality for:
//! - Validating the configured string session
//! - Signing in, repairing the session's data center and checking the deny-list
//! - Loading, unloading and dispatching to JSON plugin manifests
//! - Restarting the process on request or after transport corruption

pub mod blacklist;
pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod plugins;
pub mod session;
pub mod supervisor;
pub mod telegram;
