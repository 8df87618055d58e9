//! Application-wide constants for pawlink.
//!
//! This module centralizes the fixed timing values and wire-level strings
//! of the real-time layer. Heartbeat and reconnect values are construction
//! time defaults for [`crate::session::SessionConfig`]; nothing tunes them
//! per call.
//!
//! # Categories
//!
//! - **Timeouts**: Network and handshake timeouts
//! - **Heartbeat**: STOMP heart-beat negotiation
//! - **Destinations**: Topic and application prefixes

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for REST calls (chat list snapshot).
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the connection task waits for CONNECTED after sending CONNECT.
///
/// A broker that accepts the WebSocket but never answers the STOMP
/// handshake is treated like a failed connection and retried.
pub const STOMP_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed delay between reconnection attempts.
///
/// Unlike the exponential backoff used for other long-lived sockets, the
/// chat connection retries at a constant pace so unread badges recover
/// quickly after a network blip.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);

// ============================================================================
// Heartbeat
// ============================================================================

/// Interval the client is willing to receive heart-beats at.
pub const HEARTBEAT_INCOMING: Duration = Duration::from_millis(4000);

/// Interval the client offers to send heart-beats at.
pub const HEARTBEAT_OUTGOING: Duration = Duration::from_millis(4000);

/// Missed-heartbeat tolerance: the connection is stale after this many
/// negotiated incoming intervals without any inbound traffic.
pub const HEARTBEAT_GRACE_FACTOR: u32 = 2;

// ============================================================================
// Destinations
// ============================================================================

/// Prefix for application (server-handled) destinations.
pub const APP_PREFIX: &str = "/app";

/// Prefix for per-chat broadcast topics.
pub const CHAT_TOPIC_PREFIX: &str = "/topic/chats/";

/// WebSocket endpoint path appended to the server URL.
pub const WS_ENDPOINT_PATH: &str = "/ws";

/// STOMP versions offered in CONNECT.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// WebSocket subprotocols offered during the upgrade.
pub const STOMP_SUBPROTOCOLS: &str = "v12.stomp, v11.stomp, v10.stomp";

/// Build the canonical topic destination for a chat.
#[must_use]
pub fn chat_topic(chat_id: &str) -> String {
    format!("{CHAT_TOPIC_PREFIX}{chat_id}")
}

/// Build an application destination from a caller-supplied path.
#[must_use]
pub fn app_destination(destination: &str) -> String {
    format!("{APP_PREFIX}{destination}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_topic() {
        assert_eq!(chat_topic("42"), "/topic/chats/42");
    }

    #[test]
    fn test_app_destination_keeps_leading_slash() {
        assert_eq!(app_destination("/chat.send"), "/app/chat.send");
    }

    #[test]
    fn test_heartbeat_grace_exceeds_interval() {
        assert!(HEARTBEAT_INCOMING * HEARTBEAT_GRACE_FACTOR > HEARTBEAT_INCOMING);
    }
}
