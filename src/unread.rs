//! Per-chat unread indicators and the derived "any unread" flag.
//!
//! Several sources update the same chat in quick succession (a live topic
//! subscription marking it unread, an open chat view marking it read). The
//! engine only publishes a new snapshot when a stored value actually
//! changes, so observers see exactly one notification per real transition.
//! Consumers that count badge increments rely on this; an unconditional
//! replace would double count.
//!
//! # Observing
//!
//! ```ignore
//! let unread = UnreadIndicators::new();
//! let mut rx = unread.subscribe();
//! tokio::spawn(async move {
//!     while rx.changed().await.is_ok() {
//!         let snap = rx.borrow_and_update().clone();
//!         render_badge(snap.has_unread());
//!     }
//! });
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::chat::ChatId;

/// Immutable view of the indicator map at one revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadSnapshot {
    indicators: Arc<HashMap<ChatId, bool>>,
    has_unread: bool,
    revision: u64,
}

impl UnreadSnapshot {
    /// Stored value for `chat_id`, `false` when unknown.
    #[must_use]
    pub fn get(&self, chat_id: &ChatId) -> bool {
        self.indicators.get(chat_id).copied().unwrap_or(false)
    }

    /// Logical OR over every indicator.
    #[must_use]
    pub fn has_unread(&self) -> bool {
        self.has_unread
    }

    /// Number of genuine changes applied so far.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The indicator map.
    #[must_use]
    pub fn indicators(&self) -> &HashMap<ChatId, bool> {
        &self.indicators
    }

    fn replaced(&self, indicators: HashMap<ChatId, bool>) -> Self {
        let has_unread = indicators.values().any(|&v| v);
        Self {
            indicators: Arc::new(indicators),
            has_unread,
            revision: self.revision + 1,
        }
    }
}

/// Reconciliation engine for chat unread state.
///
/// `Send + Sync`; share it behind an `Arc`. Check-and-update happens under
/// the watch channel's lock, so racing `set` calls cannot both observe the
/// old value.
#[derive(Debug)]
pub struct UnreadIndicators {
    tx: watch::Sender<UnreadSnapshot>,
}

impl Default for UnreadIndicators {
    fn default() -> Self {
        Self::new()
    }
}

impl UnreadIndicators {
    /// Create an engine with no indicators.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(UnreadSnapshot::default());
        Self { tx }
    }

    /// Set the indicator for `chat_id`.
    ///
    /// Returns `true` if the stored value changed. An unchanged value
    /// (an unknown chat counts as `false`) leaves the map untouched and
    /// notifies nobody.
    pub fn set(&self, chat_id: impl Into<ChatId>, has_unread: bool) -> bool {
        let chat_id = chat_id.into();
        let changed = self.tx.send_if_modified(|snap| {
            if snap.get(&chat_id) == has_unread {
                return false;
            }
            let mut next = (*snap.indicators).clone();
            next.insert(chat_id.clone(), has_unread);
            *snap = snap.replaced(next);
            true
        });

        if changed {
            log::debug!("[Unread] {} -> {}", chat_id, has_unread);
        }
        changed
    }

    /// Mark `chat_id` as read. Same as `set(chat_id, false)`.
    pub fn reset(&self, chat_id: impl Into<ChatId>) -> bool {
        self.set(chat_id, false)
    }

    /// Replace the whole map with an authoritative snapshot.
    ///
    /// Always publishes, even when the snapshot matches local state; the
    /// snapshot wins over anything accumulated before it arrived.
    pub fn initialize(&self, indicators: HashMap<ChatId, bool>) {
        let count = indicators.len();
        self.tx.send_modify(|snap| {
            *snap = snap.replaced(indicators);
        });
        log::debug!("[Unread] Initialized {} chat indicator(s)", count);
    }

    /// Stored value for `chat_id`, `false` when unknown.
    #[must_use]
    pub fn get(&self, chat_id: impl Into<ChatId>) -> bool {
        self.tx.borrow().get(&chat_id.into())
    }

    /// Whether any chat has unread messages.
    #[must_use]
    pub fn has_unread_messages(&self) -> bool {
        self.tx.borrow().has_unread
    }

    /// Clone of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> UnreadSnapshot {
        self.tx.borrow().clone()
    }

    /// Observe changes. The receiver starts with the current snapshot
    /// marked as seen.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<UnreadSnapshot> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, bool)]) -> HashMap<ChatId, bool> {
        pairs.iter().map(|&(k, v)| (ChatId::from(k), v)).collect()
    }

    #[test]
    fn test_unknown_chat_defaults_to_false() {
        let unread = UnreadIndicators::new();
        assert!(!unread.get("nope"));
        assert!(!unread.has_unread_messages());
    }

    #[test]
    fn test_repeated_set_notifies_once() {
        let unread = UnreadIndicators::new();
        let mut rx = unread.subscribe();

        assert!(unread.set("chat1", true));
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        assert!(!unread.set("chat1", true));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(unread.snapshot().revision(), 1);
    }

    #[test]
    fn test_redundant_set_keeps_map_identity() {
        let unread = UnreadIndicators::new();
        unread.set("chat1", true);
        let before = unread.snapshot();
        unread.set("chat1", true);
        let after = unread.snapshot();
        assert!(Arc::ptr_eq(&before.indicators, &after.indicators));
    }

    #[test]
    fn test_setting_unknown_chat_false_is_noop() {
        let unread = UnreadIndicators::new();
        assert!(!unread.reset("chat9"));
        assert_eq!(unread.snapshot().revision(), 0);
        assert!(unread.snapshot().indicators().is_empty());
    }

    #[test]
    fn test_or_semantics() {
        let unread = UnreadIndicators::new();
        unread.initialize(snapshot(&[("chat1", false), ("chat2", true), ("chat3", false)]));
        assert!(unread.has_unread_messages());

        assert!(unread.reset("chat2"));
        assert!(!unread.has_unread_messages());
        assert!(!unread.get("chat2"));
    }

    #[test]
    fn test_initialize_overwrites_local_state() {
        let unread = UnreadIndicators::new();
        unread.set("chat1", true);

        unread.initialize(snapshot(&[("chat1", false), ("chat2", true)]));
        assert!(!unread.get("chat1"));
        assert!(unread.get("chat2"));
        assert!(unread.has_unread_messages());
    }

    #[test]
    fn test_initialize_always_notifies() {
        let unread = UnreadIndicators::new();
        unread.initialize(snapshot(&[("chat1", true)]));
        let mut rx = unread.subscribe();

        unread.initialize(snapshot(&[("chat1", true)]));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().revision(), 2);
    }

    #[test]
    fn test_numeric_and_string_ids_share_indicator() {
        let unread = UnreadIndicators::new();
        unread.set(5_u64, true);
        assert!(unread.get("5"));
        assert!(!unread.set("5", true));
    }

    #[tokio::test]
    async fn test_observer_sees_each_transition() {
        let unread = Arc::new(UnreadIndicators::new());
        let mut rx = unread.subscribe();

        let writer = Arc::clone(&unread);
        tokio::spawn(async move {
            writer.set("a", true);
        })
        .await
        .unwrap();

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().has_unread());

        unread.reset("a");
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().has_unread());
    }
}
