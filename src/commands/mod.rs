//! Command handling module.
//!
//! Built-in commands sent from the signed-in account, e.g. `.load greet`.
//! They manage plugins and the process itself.

mod handler;
mod types;

pub use handler::{CORE_OWNER, CommandHandler};
pub use types::BotCommand;
