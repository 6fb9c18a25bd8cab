//! Event handler building blocks.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use super::PluginRegistry;
use crate::telegram::Identity;

/// An incoming or outgoing chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub chat_id: i64,
    pub message_id: i32,
    pub sender_id: Option<i64>,
    pub text: String,
    pub outgoing: bool,
}

/// Where a completion notice goes after a reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebootRequest {
    pub chat_id: i64,
    pub message_id: i32,
}

impl RebootRequest {
    /// Stored form: `chat|message`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}|{}", self.chat_id, self.message_id)
    }

    /// Parses the stored form.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        let (chat, message) = raw.split_once('|')?;
        Some(Self {
            chat_id: chat.trim().parse().ok()?,
            message_id: message.trim().parse().ok()?,
        })
    }
}

impl From<&MessageEvent> for RebootRequest {
    fn from(event: &MessageEvent) -> Self {
        Self {
            chat_id: event.chat_id,
            message_id: event.message_id,
        }
    }
}

/// Decides which events reach a handler.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pattern: Option<Regex>,
    outgoing: bool,
    incoming: bool,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::any()
    }
}

impl EventFilter {
    /// Matches every message in both directions.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            pattern: None,
            outgoing: true,
            incoming: true,
        }
    }

    /// Restricts the filter to messages whose text matches `pattern`.
    #[must_use]
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Selects which message directions pass.
    #[must_use]
    pub const fn with_direction(mut self, outgoing: bool, incoming: bool) -> Self {
        self.outgoing = outgoing;
        self.incoming = incoming;
        self
    }

    /// Only messages sent by the signed-in account.
    #[must_use]
    pub const fn outgoing_only(self) -> Self {
        self.with_direction(true, false)
    }

    #[must_use]
    pub fn pattern(&self) -> Option<&Regex> {
        self.pattern.as_ref()
    }

    /// Whether `event` passes this filter.
    #[must_use]
    pub fn matches(&self, event: &MessageEvent) -> bool {
        let direction = if event.outgoing { self.outgoing } else { self.incoming };
        direction && self.pattern.as_ref().is_none_or(|p| p.is_match(&event.text))
    }
}

/// What a handler asks the dispatcher to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to send; keep going.
    Continue,
    /// Send `text`; `stop` ends propagation.
    Reply { text: String, stop: bool },
    /// End propagation silently.
    Stop,
    /// Send `notice`, then restart the whole process.
    Reboot { notice: String },
}

impl Outcome {
    /// A reply that lets later handlers run.
    #[must_use]
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply {
            text: text.into(),
            stop: false,
        }
    }
}

/// Error raised inside a handler; logged by the dispatcher.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// State visible to handlers while they run.
pub struct HandlerContext<'a> {
    pub registry: &'a PluginRegistry,
    pub identity: &'a Identity,
    pub uptime: Duration,
}

impl HandlerContext<'_> {
    /// Uptime as `1d 2h 3m 4s`.
    #[must_use]
    pub fn uptime_text(&self) -> String {
        format_uptime(self.uptime)
    }
}

/// Callback invoked for events passing its filter.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        event: &MessageEvent,
        ctx: &HandlerContext<'_>,
    ) -> Result<Outcome, HandlerError>;
}

/// Formats a duration, omitting leading zero units.
#[must_use]
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let units = [
        (total / 86_400, "d"),
        ((total % 86_400) / 3600, "h"),
        ((total % 3600) / 60, "m"),
    ];

    let mut parts: Vec<String> = units
        .iter()
        .skip_while(|(value, _)| *value == 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();
    parts.push(format!("{}s", total % 60));
    parts.join(" ")
}
