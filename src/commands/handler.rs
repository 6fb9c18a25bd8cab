//! Command handler implementation.

use async_trait::async_trait;
use tracing::{debug, info};

use super::types::BotCommand;
use crate::plugins::{Handler, HandlerContext, HandlerError, MessageEvent, Outcome};

/// Owner id of the built-in command handler.
pub const CORE_OWNER: &str = "core";

/// Executes built-in commands sent by the signed-in account.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    /// Command prefix (e.g. ".").
    prefix: String,
}

impl CommandHandler {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(prefix: String) -> Self {
        Self { prefix }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Executes a parsed command.
    async fn execute(&self, command: BotCommand, ctx: &HandlerContext<'_>) -> Outcome {
        match command {
            BotCommand::Ping => Outcome::reply("Pong!"),
            BotCommand::Uptime => Outcome::reply(format!("Uptime: {}", ctx.uptime_text())),
            BotCommand::Plugins => Self::handle_plugins(ctx).await,
            BotCommand::Load(name) => Self::handle_load(&name, ctx).await,
            BotCommand::Unload(name) => Self::handle_unload(&name, ctx).await,
            BotCommand::Reboot => {
                info!("Reboot requested");
                Outcome::Reboot {
                    notice: "Rebooting...".to_owned(),
                }
            }
            BotCommand::Info => Outcome::reply(format!(
                "Logged in as {} [{}]\nPlugins loaded: {}\nHandlers: {}",
                ctx.identity.display(),
                ctx.identity.id(),
                ctx.registry.loaded().await.len(),
                ctx.registry.handler_count().await,
            )),
            BotCommand::Help => self.handle_help(),
        }
    }

    async fn handle_plugins(ctx: &HandlerContext<'_>) -> Outcome {
        let available = ctx.registry.all_plugins();
        if available.is_empty() {
            return Outcome::reply("No plugins found.");
        }

        let loaded = ctx.registry.loaded().await;
        let mut lines = vec![format!("Plugins ({}):", available.len())];
        for entry in available {
            let marker = if loaded.contains(&entry.name) { "● " } else { "○ " };
            lines.push(format!("{marker}{}", entry.path));
        }
        Outcome::reply(lines.join("\n"))
    }

    async fn handle_load(name: &str, ctx: &HandlerContext<'_>) -> Outcome {
        if ctx.registry.load(name).await {
            Outcome::reply(format!("✓ Loaded plugin {name}"))
        } else {
            Outcome::reply(format!("✗ Failed to load plugin {name}, check the logs"))
        }
    }

    async fn handle_unload(name: &str, ctx: &HandlerContext<'_>) -> Outcome {
        match ctx.registry.unload(name).await {
            Ok(removed) => Outcome::reply(format!("✓ Removed plugin {name} ({removed} handlers)")),
            Err(e) => Outcome::reply(format!("✗ {e}")),
        }
    }

    fn handle_help(&self) -> Outcome {
        let mut lines = vec![format!("Commands (prefix: {})", self.prefix), String::new()];

        for (cmd, aliases, desc) in BotCommand::all_commands() {
            let alias_str = if aliases.is_empty() {
                String::new()
            } else {
                format!(" {aliases}")
            };
            lines.push(format!("  {cmd}{alias_str} - {desc}"));
        }

        Outcome::reply(lines.join("\n"))
    }
}

#[async_trait]
impl Handler for CommandHandler {
    async fn handle(
        &self,
        event: &MessageEvent,
        ctx: &HandlerContext<'_>,
    ) -> Result<Outcome, HandlerError> {
        let Some(command) = BotCommand::parse(&event.text, &self.prefix) else {
            return Ok(Outcome::Continue);
        };

        debug!("Handling command: {}", command);
        Ok(self.execute(command, ctx).await)
    }
}
