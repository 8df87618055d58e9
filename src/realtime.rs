//! Single entry point for the real-time chat layer.
//!
//! [`RealtimeClient`] owns the [`Session`] and the shared
//! [`UnreadIndicators`], and maps chat ids onto wire destinations so callers
//! never build topic strings themselves.
//!
//! # Usage
//!
//! ```ignore
//! let mut client = RealtimeClient::new(SessionConfig::new(ws_url));
//! let handle = client.connect("user-1", Some(&token));
//! handle.connected().await;
//!
//! client.track_unread("42", |msg| println!("chat 42: {msg}"));
//! client.send_to_app("/chat/42", &json!({"content": "hi"}));
//!
//! client.disconnect();
//! ```

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::watch;

use crate::api::ChatApi;
use crate::chat::{indicator_snapshot, ChatId};
use crate::constants;
use crate::session::{ConnectionHandle, ConnectionState, Session, SessionConfig, Subscription};
use crate::unread::UnreadIndicators;

/// Facade over the session, subscription registry and unread engine.
#[derive(Debug)]
pub struct RealtimeClient {
    session: Session,
    unread: Arc<UnreadIndicators>,
}

impl RealtimeClient {
    /// Create a disconnected client with an empty unread map.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_unread(config, Arc::new(UnreadIndicators::new()))
    }

    /// Create a client that updates an existing unread engine.
    #[must_use]
    pub fn with_unread(config: SessionConfig, unread: Arc<UnreadIndicators>) -> Self {
        Self {
            session: Session::new(config),
            unread,
        }
    }

    /// Start (or reuse) the connection. See [`Session::connect`].
    pub fn connect(&mut self, identity: &str, token: Option<&str>) -> ConnectionHandle {
        self.session.connect(identity, token)
    }

    /// Release all subscriptions and close the connection.
    pub fn disconnect(&mut self) {
        self.session.disconnect();
    }

    /// Whether the connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// The current connection handle, if any.
    #[must_use]
    pub fn handle(&self) -> Option<&ConnectionHandle> {
        self.session.handle()
    }

    /// Watch connection state transitions, if a connection exists.
    #[must_use]
    pub fn state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.session.handle().map(ConnectionHandle::watch_state)
    }

    /// The underlying session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The shared unread engine.
    #[must_use]
    pub fn unread(&self) -> &Arc<UnreadIndicators> {
        &self.unread
    }

    /// Publish `message` as JSON to `/app{destination}`.
    ///
    /// Fire-and-forget: returns whether the frame was queued. Does nothing
    /// while disconnected.
    pub fn send_to_app<T: Serialize + ?Sized>(&self, destination: &str, message: &T) -> bool {
        if !self.session.is_connected() {
            log::debug!("[STOMP] send_to_app({}) while disconnected, ignoring", destination);
            return false;
        }

        let body = match serde_json::to_string(message) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("[STOMP] Could not serialize message for {}: {}", destination, e);
                return false;
            }
        };

        self.session
            .publish(&constants::app_destination(destination), body)
    }

    /// Subscribe to `/topic/chats/{chat_id}`.
    pub fn subscribe_to_chat_topic<F>(
        &self,
        chat_id: impl Into<ChatId>,
        callback: F,
    ) -> Option<Subscription>
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.session.subscribe_to(&chat_id.into().topic(), callback)
    }

    /// Release the subscription to `/topic/chats/{chat_id}`, if any.
    pub fn unsubscribe_from_chat_topic(&self, chat_id: impl Into<ChatId>) {
        self.session.unsubscribe_from(&chat_id.into().topic());
    }

    /// Subscribe to a chat topic and mark the chat unread on every message
    /// before handing the payload to `on_message`.
    pub fn track_unread<F>(&self, chat_id: impl Into<ChatId>, on_message: F) -> Option<Subscription>
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        let chat_id = chat_id.into();
        let unread = Arc::clone(&self.unread);
        let id = chat_id.clone();
        self.subscribe_to_chat_topic(chat_id, move |payload| {
            unread.set(&id, true);
            on_message(payload);
        })
    }

    /// Mark a chat as read.
    pub fn mark_read(&self, chat_id: impl Into<ChatId>) -> bool {
        self.unread.reset(chat_id)
    }

    /// Seed the unread engine from the backend's chat list.
    ///
    /// Returns the number of chats in the snapshot.
    pub async fn load_unread_snapshot(&self, api: &ChatApi, user_id: &str) -> Result<usize> {
        let chats = api.fetch_chats(user_id).await?;
        let snapshot = indicator_snapshot(&chats);
        let count = snapshot.len();
        self.unread.initialize(snapshot);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> RealtimeClient {
        RealtimeClient::new(SessionConfig::new("ws://127.0.0.1:1/ws"))
    }

    #[test]
    fn test_send_to_app_while_disconnected_is_noop() {
        let client = offline_client();
        assert!(!client.send_to_app("/chat/1", &serde_json::json!({"content": "hi"})));
    }

    #[test]
    fn test_unsubscribe_without_connection_is_safe() {
        let mut client = offline_client();
        client.unsubscribe_from_chat_topic("chat1");
        client.disconnect();
        client.unsubscribe_from_chat_topic(7_u64);
        assert!(!client.is_connected());
        assert!(client.state().is_none());
    }

    #[test]
    fn test_chat_subscription_requires_connection() {
        let client = offline_client();
        assert!(client.subscribe_to_chat_topic("1", |_| {}).is_none());
        assert!(client.track_unread("1", |_| {}).is_none());
    }

    #[test]
    fn test_mark_read_resets_shared_engine() {
        let unread = Arc::new(UnreadIndicators::new());
        unread.set("chat1", true);
        let client = RealtimeClient::with_unread(
            SessionConfig::new("ws://127.0.0.1:1/ws"),
            Arc::clone(&unread),
        );
        assert!(client.mark_read("chat1"));
        assert!(!unread.has_unread_messages());
        assert!(!client.mark_read("chat1"));
    }
}
