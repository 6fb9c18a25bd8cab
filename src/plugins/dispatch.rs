//! Event dispatch over the registered handlers.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::PluginRegistry;
use super::handler::{HandlerContext, MessageEvent, Outcome, RebootRequest};
use crate::telegram::Identity;

/// What the transport should do after an event was handled.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Replies to send, in handler order.
    pub replies: Vec<String>,
    /// Set when a handler asked for a process restart.
    pub reboot: Option<RebootRequest>,
}

/// Runs matching handlers for each event, newest registration first.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    identity: Identity,
    started_at: Instant,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<PluginRegistry>, identity: Identity, started_at: Instant) -> Self {
        Self {
            registry,
            identity,
            started_at,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Handles one event.
    ///
    /// Matching handlers are snapshotted first, so a handler may load or
    /// unload plugins without affecting the current event.
    pub async fn dispatch(&self, event: &MessageEvent) -> Dispatch {
        let handlers = self.registry.matching(event).await;
        if handlers.is_empty() {
            return Dispatch::default();
        }

        debug!(
            "Dispatching message {} in chat {} to {} handlers",
            event.message_id,
            event.chat_id,
            handlers.len()
        );

        let ctx = HandlerContext {
            registry: &self.registry,
            identity: &self.identity,
            uptime: self.started_at.elapsed(),
        };

        let mut result = Dispatch::default();
        for handler in handlers {
            match handler.handle(event, &ctx).await {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Reply { text, stop }) => {
                    result.replies.push(text);
                    if stop {
                        break;
                    }
                }
                Ok(Outcome::Stop) => break,
                Ok(Outcome::Reboot { notice }) => {
                    result.replies.push(notice);
                    result.reboot = Some(RebootRequest::from(event));
                    break;
                }
                Err(e) => warn!("Handler failed on message {}: {}", event.message_id, e),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::plugins::handler::{EventFilter, Handler, HandlerError};
    use crate::telegram::Account;

    struct Fixed(Result<Outcome, &'static str>);

    #[async_trait]
    impl Handler for Fixed {
        async fn handle(
            &self,
            _event: &MessageEvent,
            _ctx: &HandlerContext<'_>,
        ) -> Result<Outcome, HandlerError> {
            self.0.clone().map_err(|e| HandlerError(e.to_owned()))
        }
    }

    fn dispatcher(registry: Arc<PluginRegistry>) -> Dispatcher {
        Dispatcher::new(
            registry,
            Identity::from_account(Account {
                id: 1,
                ..Account::default()
            }),
            Instant::now(),
        )
    }

    fn event() -> MessageEvent {
        MessageEvent {
            chat_id: 10,
            message_id: 20,
            sender_id: Some(1),
            text: ".x".to_owned(),
            outgoing: true,
        }
    }

    async fn add(registry: &PluginRegistry, outcome: Result<Outcome, &'static str>) {
        registry
            .add_handler("test", EventFilter::any(), Arc::new(Fixed(outcome)))
            .await;
    }

    #[tokio::test]
    async fn test_newest_handler_runs_first() {
        let registry = Arc::new(PluginRegistry::new("plugins"));
        add(&registry, Ok(Outcome::reply("old"))).await;
        add(&registry, Ok(Outcome::reply("new"))).await;

        let result = dispatcher(registry).dispatch(&event()).await;
        assert_eq!(result.replies, ["new", "old"]);
        assert!(result.reboot.is_none());
    }

    #[tokio::test]
    async fn test_stop_and_errors() {
        let registry = Arc::new(PluginRegistry::new("plugins"));
        add(&registry, Ok(Outcome::reply("never"))).await;
        add(&registry, Ok(Outcome::Stop)).await;
        add(&registry, Err("boom")).await;
        add(&registry, Ok(Outcome::Continue)).await;

        let result = dispatcher(registry).dispatch(&event()).await;
        assert!(result.replies.is_empty());
    }

    #[tokio::test]
    async fn test_reboot_records_origin() {
        let registry = Arc::new(PluginRegistry::new("plugins"));
        add(
            &registry,
            Ok(Outcome::Reboot {
                notice: "Rebooting...".to_owned(),
            }),
        )
        .await;

        let result = dispatcher(registry).dispatch(&event()).await;
        assert_eq!(result.replies, ["Rebooting..."]);
        assert_eq!(
            result.reboot,
            Some(RebootRequest {
                chat_id: 10,
                message_id: 20
            })
        );
    }
}
