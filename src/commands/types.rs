//! Command types and definitions.

use std::fmt;

/// Built-in userbot commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Check that the bot responds.
    Ping,

    /// Show how long the process has been running.
    Uptime,

    /// List plugin files and which are loaded.
    Plugins,

    /// Load (or reload) a custom plugin.
    Load(String),

    /// Unload a plugin and its handlers.
    Unload(String),

    /// Restart the whole process.
    Reboot,

    /// Show the signed-in account.
    Info,

    /// Show help information.
    Help,
}

impl BotCommand {
    /// Parses a command from a message text.
    ///
    /// Returns `None` if the message is not a valid command.
    #[must_use]
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let text = text.trim();

        let after_prefix = text.strip_prefix(prefix)?;

        let (cmd, args) = match after_prefix.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd.to_lowercase(), Some(args.trim())),
            None => (after_prefix.to_lowercase(), None),
        };

        let arg = || {
            args.filter(|a| !a.is_empty())
                .map(|a| a.split_whitespace().next().unwrap_or(a).to_owned())
        };

        match cmd.as_str() {
            "ping" => Some(Self::Ping),
            "uptime" | "up" => Some(Self::Uptime),
            "plugins" | "plugs" => Some(Self::Plugins),
            "load" | "install" => arg().map(Self::Load),
            "unload" | "uninstall" => arg().map(Self::Unload),
            "reboot" | "restart" => Some(Self::Reboot),
            "info" | "me" => Some(Self::Info),
            "help" | "h" | "?" => Some(Self::Help),
            _ => None,
        }
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Uptime => "uptime",
            Self::Plugins => "plugins",
            Self::Load(_) => "load",
            Self::Unload(_) => "unload",
            Self::Reboot => "reboot",
            Self::Info => "info",
            Self::Help => "help",
        }
    }

    /// Returns all available commands with their descriptions.
    #[must_use]
    pub fn all_commands() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("ping", "", "Check that the bot responds"),
            ("uptime", "(up)", "Show process uptime"),
            ("plugins", "", "List plugins and their state"),
            ("load <name>", "", "Load or reload a custom plugin"),
            ("unload <name>", "", "Unload a plugin"),
            ("reboot", "(restart)", "Restart the process"),
            ("info", "(me)", "Show the signed-in account"),
            ("help", "(h, ?)", "Show this help message"),
        ]
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(name) => write!(f, "load {name}"),
            Self::Unload(name) => write!(f, "unload {name}"),
            _ => write!(f, "{}", self.name()),
        }
    }
}
