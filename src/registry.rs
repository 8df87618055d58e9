//! Subscription bookkeeping keyed by destination.
//!
//! The registry enforces at most one subscription per destination. It is
//! shared between the [`crate::session::Session`] (which mutates it on
//! subscribe/unsubscribe) and the connection task (which looks up callbacks
//! when MESSAGE frames arrive and re-subscribes after a reconnect).
//!
//! # Deadlock Prevention
//!
//! Callers clone the callback `Arc` out under the lock and release the lock
//! before invoking it. A callback may therefore subscribe or unsubscribe
//! without deadlocking, and a frame that races an unsubscribe simply misses
//! the lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Callback invoked with the parsed JSON payload of every frame delivered
/// to a destination.
pub type MessageCallback = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Thread-safe handle to the subscription registry.
pub type SharedRegistry = Arc<Mutex<SubscriptionRegistry>>;

/// Create a new shared subscription registry.
#[must_use]
pub fn new_shared_registry() -> SharedRegistry {
    Arc::new(Mutex::new(SubscriptionRegistry::default()))
}

/// Lock the registry, recovering the data if a callback panicked while a
/// previous guard was held.
pub fn lock_registry(registry: &SharedRegistry) -> MutexGuard<'_, SubscriptionRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-destination state.
struct Entry {
    /// Wire subscription id (`sub-N`).
    id: String,
    callback: MessageCallback,
}

/// Destination → subscription map.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<String, Entry>,
    /// Monotonic counter for subscription ids. Never reset, so an id is
    /// never reused by a later subscription within the same session.
    next_id: u64,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("destinations", &self.entries.keys().collect::<Vec<_>>())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Number of tracked subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no subscriptions are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `destination` has a subscription.
    #[must_use]
    pub fn contains(&self, destination: &str) -> bool {
        self.entries.contains_key(destination)
    }

    /// Subscription id currently registered for `destination`.
    #[must_use]
    pub fn id_for(&self, destination: &str) -> Option<&str> {
        self.entries.get(destination).map(|e| e.id.as_str())
    }

    /// Whether `id` is the live subscription for `destination`.
    #[must_use]
    pub fn is_current(&self, destination: &str, id: &str) -> bool {
        self.id_for(destination) == Some(id)
    }

    /// Register `callback` for `destination` under a fresh id.
    ///
    /// Returns the new id and, when the destination was already subscribed,
    /// the id of the replaced subscription so the caller can release it on
    /// the wire. Both happen under the same lock as the insert.
    pub fn insert(
        &mut self,
        destination: &str,
        callback: MessageCallback,
    ) -> (String, Option<String>) {
        let id = format!("sub-{}", self.next_id);
        self.next_id += 1;

        let replaced = self
            .entries
            .insert(
                destination.to_string(),
                Entry {
                    id: id.clone(),
                    callback,
                },
            )
            .map(|old| old.id);

        if let Some(ref old) = replaced {
            log::debug!(
                "[Registry] Replaced subscription {} on {} with {}",
                old,
                destination,
                id
            );
        }

        (id, replaced)
    }

    /// Remove the subscription for `destination`, returning its id.
    pub fn remove(&mut self, destination: &str) -> Option<String> {
        self.entries.remove(destination).map(|e| e.id)
    }

    /// Remove the subscription for `destination` only if it still has `id`.
    pub fn remove_if_current(&mut self, destination: &str, id: &str) -> bool {
        if self.is_current(destination, id) {
            self.entries.remove(destination);
            true
        } else {
            false
        }
    }

    /// Clear the registry, returning the ids that were released.
    pub fn take_all(&mut self) -> Vec<String> {
        self.entries.drain().map(|(_, e)| e.id).collect()
    }

    /// All `(id, destination)` pairs, for re-subscribing after a reconnect.
    #[must_use]
    pub fn active(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(dest, e)| (e.id.clone(), dest.clone()))
            .collect()
    }

    /// Find the callback for an inbound frame.
    ///
    /// When the frame names a `subscription` id that is not the current one
    /// for its destination (a frame still in flight for a released or
    /// replaced subscription), there is no match.
    #[must_use]
    pub fn route(&self, destination: &str, subscription: Option<&str>) -> Option<MessageCallback> {
        let entry = self.entries.get(destination)?;
        match subscription {
            Some(id) if id != entry.id => None,
            _ => Some(Arc::clone(&entry.callback)),
        }
    }
}
