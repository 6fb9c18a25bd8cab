//! Ordered handler storage with per-owner indexing.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::handler::{EventFilter, Handler, MessageEvent};

/// Registration order key; higher ids were added later.
pub type HandlerId = u64;

/// A handler together with its filter and owning module.
#[derive(Clone)]
pub struct Registration {
    pub owner: String,
    pub filter: EventFilter,
    pub callback: Arc<dyn Handler>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("owner", &self.owner)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// All registered handlers.
///
/// Iteration is newest-first; removing an owner's handlers never reorders
/// the rest.
#[derive(Debug, Default)]
pub struct HandlerTable {
    next_id: HandlerId,
    entries: BTreeMap<HandlerId, Registration>,
    by_owner: HashMap<String, BTreeSet<HandlerId>>,
}

impl HandlerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback unless that exact callback is already present.
    pub fn add(
        &mut self,
        owner: &str,
        filter: EventFilter,
        callback: Arc<dyn Handler>,
    ) -> Option<HandlerId> {
        if self.contains(&callback) {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            Registration {
                owner: owner.to_owned(),
                filter,
                callback,
            },
        );
        self.by_owner.entry(owner.to_owned()).or_default().insert(id);
        Some(id)
    }

    /// Whether `callback` is registered under any owner.
    #[must_use]
    pub fn contains(&self, callback: &Arc<dyn Handler>) -> bool {
        self.entries
            .values()
            .any(|entry| Arc::ptr_eq(&entry.callback, callback))
    }

    /// Removes every handler of `owner`, returning how many went.
    pub fn remove_owner(&mut self, owner: &str) -> usize {
        let Some(ids) = self.by_owner.remove(owner) else {
            return 0;
        };
        ids.into_iter()
            .filter(|id| self.entries.remove(id).is_some())
            .count()
    }

    /// Handlers in dispatch order, newest first.
    pub fn iter(&self) -> impl Iterator<Item = (HandlerId, &Registration)> {
        self.entries.iter().rev().map(|(id, entry)| (*id, entry))
    }

    /// Callbacks whose filter accepts `event`, newest first.
    #[must_use]
    pub fn matching(&self, event: &MessageEvent) -> Vec<Arc<dyn Handler>> {
        self.iter()
            .filter(|(_, entry)| entry.filter.matches(event))
            .map(|(_, entry)| Arc::clone(&entry.callback))
            .collect()
    }

    /// Number of handlers owned by `owner`.
    #[must_use]
    pub fn owned_by(&self, owner: &str) -> usize {
        self.by_owner.get(owner).map_or(0, BTreeSet::len)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::plugins::handler::{HandlerContext, HandlerError, Outcome};

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn handle(
            &self,
            _event: &MessageEvent,
            _ctx: &HandlerContext<'_>,
        ) -> Result<Outcome, HandlerError> {
            Ok(Outcome::Continue)
        }
    }

    fn noop() -> Arc<dyn Handler> {
        Arc::new(Noop)
    }

    fn owners(table: &HandlerTable) -> Vec<String> {
        table.iter().map(|(_, e)| e.owner.clone()).collect()
    }

    #[test]
    fn test_same_callback_registered_once() {
        let mut table = HandlerTable::new();
        let callback = noop();
        assert!(table.add("a", EventFilter::any(), Arc::clone(&callback)).is_some());
        assert!(table.add("a", EventFilter::any(), Arc::clone(&callback)).is_none());
        assert!(table.add("b", EventFilter::any(), callback).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_iteration_is_newest_first() {
        let mut table = HandlerTable::new();
        table.add("first", EventFilter::any(), noop());
        table.add("second", EventFilter::any(), noop());
        table.add("third", EventFilter::any(), noop());
        assert_eq!(owners(&table), ["third", "second", "first"]);
    }

    #[test]
    fn test_remove_owner_keeps_others_in_order() {
        let mut table = HandlerTable::new();
        table.add("keep", EventFilter::any(), noop());
        table.add("drop", EventFilter::any(), noop());
        table.add("other", EventFilter::any(), noop());
        table.add("drop", EventFilter::any(), noop());
        table.add("keep", EventFilter::any(), noop());

        assert_eq!(table.remove_owner("drop"), 2);
        assert_eq!(owners(&table), ["keep", "other", "keep"]);
        assert_eq!(table.owned_by("drop"), 0);
        assert_eq!(table.remove_owner("drop"), 0);
    }
}
