//! Per-request state shared by every intent of one request.

use crate::outcome::PushOutcome;
use contentsync_protocol::{Channel, ItemRef, SyncAction};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

type ItemKey = (String, String);

fn item_key(item: &ItemRef) -> ItemKey {
    (item.entity_type.clone(), item.identifier().to_string())
}

#[derive(Debug, Default)]
struct RequestState {
    pulled: HashSet<ItemKey>,
    pushed: HashMap<(SyncAction, ItemKey, Channel), PushOutcome>,
    in_progress: HashSet<(ItemKey, Channel)>,
}

/// State scoped to one request, batch step or job run.
///
/// Holds the items pulled so far, the push results already produced, and the
/// (item, channel) pairs whose push is currently on the stack. Create a fresh
/// context per request; nothing here outlives it.
#[derive(Debug, Default)]
pub struct RequestContext {
    state: Mutex<RequestState>,
}

impl RequestContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `item` was pulled in this request.
    pub fn mark_pulled(&self, item: &ItemRef) {
        self.state.lock().pulled.insert(item_key(item));
    }

    /// Returns true if `item` was pulled in this request, on any channel.
    pub fn was_pulled(&self, item: &ItemRef) -> bool {
        self.state.lock().pulled.contains(&item_key(item))
    }

    /// Result of an earlier push of the same action, item and channel.
    pub fn cached_push(
        &self,
        action: SyncAction,
        item: &ItemRef,
        channel: &Channel,
    ) -> Option<PushOutcome> {
        self.state
            .lock()
            .pushed
            .get(&(action, item_key(item), channel.clone()))
            .cloned()
    }

    /// Remembers a push result for the rest of the request.
    pub fn cache_push(
        &self,
        action: SyncAction,
        item: &ItemRef,
        channel: &Channel,
        outcome: PushOutcome,
    ) {
        self.state
            .lock()
            .pushed
            .insert((action, item_key(item), channel.clone()), outcome);
    }

    /// Marks a push as started; false if it is already on the stack.
    pub fn enter(&self, item: &ItemRef, channel: &Channel) -> bool {
        self.state
            .lock()
            .in_progress
            .insert((item_key(item), channel.clone()))
    }

    /// Marks a push as finished.
    pub fn leave(&self, item: &ItemRef, channel: &Channel) {
        self.state
            .lock()
            .in_progress
            .remove(&(item_key(item), channel.clone()));
    }

    /// Returns true if a push of `item` on `channel` is on the stack.
    pub fn is_in_progress(&self, item: &ItemRef, channel: &Channel) -> bool {
        self.state
            .lock()
            .in_progress
            .contains(&(item_key(item), channel.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> ItemRef {
        ItemRef::new("node", "article", "n1")
    }

    #[test]
    fn pulled_set_ignores_bundle_and_channel() {
        let ctx = RequestContext::new();
        assert!(!ctx.was_pulled(&node()));
        ctx.mark_pulled(&node());
        assert!(ctx.was_pulled(&ItemRef::new("node", "page", "n1")));
    }

    #[test]
    fn push_cache_is_keyed_by_action_and_channel() {
        let ctx = RequestContext::new();
        let main = Channel::new("content", "main");
        let outcome = PushOutcome::Pushed {
            action: SyncAction::Create,
            hash: "h".into(),
        };
        ctx.cache_push(SyncAction::Create, &node(), &main, outcome.clone());

        assert_eq!(ctx.cached_push(SyncAction::Create, &node(), &main), Some(outcome));
        assert_eq!(ctx.cached_push(SyncAction::Delete, &node(), &main), None);
        assert_eq!(
            ctx.cached_push(SyncAction::Create, &node(), &Channel::new("content", "b")),
            None
        );
    }

    #[test]
    fn enter_guards_reentry() {
        let ctx = RequestContext::new();
        let main = Channel::new("content", "main");
        assert!(ctx.enter(&node(), &main));
        assert!(!ctx.enter(&node(), &main));
        assert!(ctx.is_in_progress(&node(), &main));
        ctx.leave(&node(), &main);
        assert!(ctx.enter(&node(), &main));
    }

    #[test]
    fn fresh_context_is_empty() {
        let first = RequestContext::new();
        first.mark_pulled(&node());
        let second = RequestContext::new();
        assert!(!second.was_pulled(&node()));
    }
}
