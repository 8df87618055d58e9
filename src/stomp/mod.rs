//! STOMP protocol support for the real-time connection.
//!
//! # Architecture
//!
//! ```text
//! stomp
//!     ├── frame      Frame / Command types, text codec (encode, decode)
//!     └── (this)     StompError, heart-beat negotiation
//! ```
//!
//! The codec is transport agnostic: it turns frames into the text carried
//! by one WebSocket message and back. Connection lifecycle lives in
//! [`crate::session`].

pub mod frame;

use std::time::Duration;

pub use frame::{decode, Command, Decoded, Frame, Inbound, Malformed};

/// Errors produced while decoding STOMP frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompError {
    /// The first line is not a known STOMP command.
    UnknownCommand(String),
    /// A header line has no `:` separator.
    MalformedHeader(String),
    /// A header contains an escape sequence STOMP 1.2 does not define.
    InvalidEscape(String),
    /// The text ended before the frame terminator.
    Incomplete,
    /// The `content-length` header does not match the body.
    ContentLength(usize),
}

impl std::fmt::Display for StompError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCommand(cmd) => write!(f, "Unknown STOMP command: {cmd}"),
            Self::MalformedHeader(line) => write!(f, "Malformed header line: {line}"),
            Self::InvalidEscape(seq) => write!(f, "Invalid header escape: {seq}"),
            Self::Incomplete => write!(f, "Frame is missing its NUL terminator"),
            Self::ContentLength(len) => write!(f, "Body does not match content-length {len}"),
        }
    }
}

impl std::error::Error for StompError {}

/// Effective heart-beat intervals after negotiation. `None` disables a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// How often the client must send something.
    pub send_every: Option<Duration>,
    /// How often the client expects to hear from the server.
    pub expect_every: Option<Duration>,
}

impl HeartBeat {
    /// Render the client's `heart-beat` CONNECT header.
    #[must_use]
    pub fn header_value(outgoing: Duration, incoming: Duration) -> String {
        format!("{},{}", outgoing.as_millis(), incoming.as_millis())
    }

    /// Negotiate with the server's `heart-beat` header from CONNECTED.
    ///
    /// Each direction runs at the larger of the two offers, and only when
    /// both sides offered a non-zero value. A missing or unparsable server
    /// header disables heart-beating.
    #[must_use]
    pub fn negotiate(outgoing: Duration, incoming: Duration, server: Option<&str>) -> Self {
        let Some((server_send, server_expect)) = server.and_then(parse_pair) else {
            return Self::default();
        };

        let pick = |ours: Duration, theirs: u64| {
            let theirs = Duration::from_millis(theirs);
            (!ours.is_zero() && !theirs.is_zero()).then_some(ours.max(theirs))
        };

        Self {
            send_every: pick(outgoing, server_expect),
            expect_every: pick(incoming, server_send),
        }
    }
}

fn parse_pair(value: &str) -> Option<(u64, u64)> {
    let (a, b) = value.split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS_4000: Duration = Duration::from_millis(4000);

    #[test]
    fn test_header_value() {
        assert_eq!(HeartBeat::header_value(MS_4000, MS_4000), "4000,4000");
    }

    #[test]
    fn test_negotiate_takes_larger_interval() {
        let hb = HeartBeat::negotiate(MS_4000, MS_4000, Some("10000,1000"));
        assert_eq!(hb.send_every, Some(MS_4000));
        assert_eq!(hb.expect_every, Some(Duration::from_millis(10000)));
    }

    #[test]
    fn test_negotiate_zero_disables_direction() {
        let hb = HeartBeat::negotiate(MS_4000, MS_4000, Some("0,5000"));
        assert_eq!(hb.send_every, Some(Duration::from_millis(5000)));
        assert_eq!(hb.expect_every, None);
    }

    #[test]
    fn test_negotiate_missing_header_disables_both() {
        assert_eq!(HeartBeat::negotiate(MS_4000, MS_4000, None), HeartBeat::default());
        assert_eq!(
            HeartBeat::negotiate(MS_4000, MS_4000, Some("garbage")),
            HeartBeat::default()
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            StompError::UnknownCommand("HELLO".into()).to_string(),
            "Unknown STOMP command: HELLO"
        );
    }
}
