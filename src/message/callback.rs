//! Message callback registry.
//!
//! Consumers subscribe to message subsets by registering a
//! [`MessageCallback`], a filter paired with a handler function. The
//! registry assigns each registration a unique integer id, the only handle
//! the consumer retains for later removal.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::message::filter::MessageFilter;
use crate::message::Message;

/// Handler invoked with every message its filter matches.
///
/// Handlers run on the background read task and must be cheap; the message
/// is shared read-only and must not be held across blocking work.
pub type MessageHandler = Arc<dyn Fn(&Arc<Message>) + Send + Sync>;

/// An owned (filter, handler) registration.
#[derive(Clone)]
pub struct MessageCallback {
    filter: MessageFilter,
    handler: MessageHandler,
}

impl MessageCallback {
    /// Creates a callback from a filter and a handler.
    pub fn new<F>(filter: MessageFilter, handler: F) -> Self
    where
        F: Fn(&Arc<Message>) + Send + Sync + 'static,
    {
        Self {
            filter,
            handler: Arc::new(handler),
        }
    }

    /// Creates a callback that receives every message.
    pub fn all<F>(handler: F) -> Self
    where
        F: Fn(&Arc<Message>) + Send + Sync + 'static,
    {
        Self::new(MessageFilter::any(), handler)
    }

    /// Returns the callback's filter.
    #[must_use]
    pub const fn filter(&self) -> &MessageFilter {
        &self.filter
    }
}

impl std::fmt::Debug for MessageCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCallback")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// Registry of message callbacks keyed by id.
///
/// Ids are monotonically increasing and never reused for the registry's
/// lifetime, so a stale id held after removal can never silently match a
/// newer registration. Callers guard the registry with a mutex held only
/// for add/remove/snapshot; handlers are always invoked outside the lock.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    next_id: u64,
    callbacks: BTreeMap<u64, MessageCallback>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback and returns its id.
    pub fn add(&mut self, callback: MessageCallback) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.callbacks.insert(id, callback);
        id
    }

    /// Removes a callback by id, returning whether an entry existed.
    pub fn remove(&mut self, id: u64) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    /// Returns the number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Returns true if no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Snapshots the handlers whose filters match a message, in
    /// registration order (ascending id).
    ///
    /// The snapshot decouples iteration from the registry itself, so a
    /// handler that adds or removes callbacks cannot corrupt an in-flight
    /// dispatch; it only affects later messages.
    #[must_use]
    pub fn matching(&self, message: &Message) -> Vec<(u64, MessageHandler)> {
        self.callbacks
            .iter()
            .filter(|(_, cb)| cb.filter.matches(message))
            .map(|(&id, cb)| (id, Arc::clone(&cb.handler)))
            .collect()
    }
}

/// Invokes a snapshot of handlers with a message.
///
/// A panicking handler is isolated and reported; the remaining handlers
/// still run. Returns the ids of handlers that panicked.
pub(crate) fn invoke_snapshot(
    snapshot: &[(u64, MessageHandler)],
    message: &Arc<Message>,
) -> Vec<u64> {
    let mut panicked = Vec::new();
    for (id, handler) in snapshot {
        if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
            tracing::warn!("message callback {id} panicked");
            panicked.push(*id);
        }
    }
    panicked
}
