//! JSON plugin manifests.
//!
//! A manifest lists handlers, each with an optional regex, the message
//! directions it listens to, and a reply template:
//!
//! ```json
//! { "description": "greets", "handlers": [
//!   { "pattern": "^\\.hi (\\w+)$", "reply": "Hello {1}, I am {me}!" } ] }
//! ```

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::PluginError;
use super::handler::{EventFilter, Handler, HandlerContext, HandlerError, MessageEvent, Outcome};

/// Parsed plugin file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Free-form summary shown in listings.
    #[serde(default)]
    pub description: Option<String>,

    /// Handlers in registration order.
    #[serde(default)]
    pub handlers: Vec<HandlerSpec>,
}

/// One handler declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerSpec {
    /// Regex matched against the message text; absent matches everything.
    #[serde(default)]
    pub pattern: Option<String>,

    /// React to messages sent by the signed-in account.
    #[serde(default = "default_outgoing")]
    pub outgoing: bool,

    /// React to messages from others.
    #[serde(default)]
    pub incoming: bool,

    /// Reply template.
    #[serde(default)]
    pub reply: Option<String>,

    /// Stop later handlers from seeing the event.
    #[serde(default)]
    pub stop: bool,
}

fn default_outgoing() -> bool {
    true
}

impl PluginManifest {
    /// Reads and parses a manifest file.
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        let content = std::fs::read_to_string(path).map_err(|source| PluginError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| PluginError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Compiles every handler; fails on the first bad declaration.
    pub fn build(&self) -> Result<Vec<(EventFilter, Arc<dyn Handler>)>, PluginError> {
        self.handlers
            .iter()
            .enumerate()
            .map(|(index, spec)| spec.build(index))
            .collect()
    }
}

impl HandlerSpec {
    fn build(&self, index: usize) -> Result<(EventFilter, Arc<dyn Handler>), PluginError> {
        if self.reply.is_none() && !self.stop {
            return Err(PluginError::EmptyHandler { index });
        }
        if !self.outgoing && !self.incoming {
            return Err(PluginError::NoDirection { index });
        }

        let pattern = self
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|source| PluginError::Pattern { index, source })?;

        let mut filter = EventFilter::any().with_direction(self.outgoing, self.incoming);
        if let Some(ref pattern) = pattern {
            filter = filter.with_pattern(pattern.clone());
        }

        let handler = TemplateHandler {
            pattern,
            reply: self.reply.clone(),
            stop: self.stop,
        };
        Ok((filter, Arc::new(handler)))
    }
}

/// Replies with a rendered template.
#[derive(Debug)]
struct TemplateHandler {
    pattern: Option<Regex>,
    reply: Option<String>,
    stop: bool,
}

#[async_trait]
impl Handler for TemplateHandler {
    async fn handle(
        &self,
        event: &MessageEvent,
        ctx: &HandlerContext<'_>,
    ) -> Result<Outcome, HandlerError> {
        let Some(ref template) = self.reply else {
            return Ok(Outcome::Stop);
        };

        let captures: Vec<String> = self
            .pattern
            .as_ref()
            .and_then(|p| p.captures(&event.text))
            .map(|caps| {
                caps.iter()
                    .skip(1)
                    .map(|m| m.map_or_else(String::new, |m| m.as_str().to_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let text = render(template, event, ctx, &captures);
        if text.trim().is_empty() {
            return Err(HandlerError("template rendered to an empty reply".to_owned()));
        }

        Ok(Outcome::Reply {
            text,
            stop: self.stop,
        })
    }
}

/// Expands `{me}`, `{id}`, `{uptime}`, `{text}` and `{1}`..`{9}`.
fn render(template: &str, event: &MessageEvent, ctx: &HandlerContext<'_>, captures: &[String]) -> String {
    let mut out = template
        .replace("{me}", &ctx.identity.display())
        .replace("{id}", &ctx.identity.id().to_string())
        .replace("{uptime}", &ctx.uptime_text())
        .replace("{text}", &event.text);

    for n in 1..=9 {
        let placeholder = format!("{{{n}}}");
        if out.contains(&placeholder) {
            let value = captures.get(n - 1).map_or("", String::as_str);
            out = out.replace(&placeholder, value);
        }
    }
    out
}
