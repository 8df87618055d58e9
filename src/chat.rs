//! Chat identifiers and the chat-list records used to seed unread state.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants;

/// Opaque chat identifier.
///
/// The backend emits chat ids as JSON strings in some payloads and as
/// numbers in others. Both normalize to the same textual key, so `7` and
/// `"7"` name the same chat.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    /// Textual form of the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical topic destination for this chat (`/topic/chats/{id}`).
    #[must_use]
    pub fn topic(&self) -> String {
        constants::chat_topic(&self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ChatId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&ChatId> for ChatId {
    fn from(id: &ChatId) -> Self {
        id.clone()
    }
}

impl From<u64> for ChatId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<i64> for ChatId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl AsRef<str> for ChatId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ChatId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
            Uint(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Int(n) => Self(n.to_string()),
            Raw::Uint(n) => Self(n.to_string()),
        })
    }
}

/// One chat as returned by the chat-list endpoint.
///
/// Only the fields needed for the unread snapshot are modeled; everything
/// else in the record is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatSummary {
    /// Chat identifier.
    pub id: ChatId,
    /// Whether the chat has unseen messages for the requesting user.
    #[serde(default, rename = "hasUnread", alias = "unread", alias = "has_unread")]
    pub has_unread: bool,
}

/// Build the indicator snapshot passed to
/// [`crate::unread::UnreadIndicators::initialize`].
///
/// A chat that appears more than once is unread if any record says so.
#[must_use]
pub fn indicator_snapshot(chats: &[ChatSummary]) -> HashMap<ChatId, bool> {
    let mut snapshot: HashMap<ChatId, bool> = HashMap::with_capacity(chats.len());
    for chat in chats {
        *snapshot.entry(chat.id.clone()).or_default() |= chat.has_unread;
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_id_from_number_and_string_match() {
        assert_eq!(ChatId::from(7_u64), ChatId::from("7"));
        assert_eq!(ChatId::from(-3_i64).as_str(), "-3");
    }

    #[test]
    fn test_chat_id_deserializes_string_or_number() {
        let ids: Vec<ChatId> = serde_json::from_str(r#"["abc", 42]"#).unwrap();
        assert_eq!(ids, vec![ChatId::from("abc"), ChatId::from(42_u64)]);
    }

    #[test]
    fn test_chat_id_topic() {
        assert_eq!(ChatId::from(9_u64).topic(), "/topic/chats/9");
    }

    #[test]
    fn test_chat_summary_field_aliases() {
        let chats: Vec<ChatSummary> = serde_json::from_str(
            r#"[{"id": 1, "hasUnread": true, "title": "x"},
                {"id": "2", "unread": true},
                {"id": 3}]"#,
        )
        .unwrap();
        assert!(chats[0].has_unread);
        assert!(chats[1].has_unread);
        assert!(!chats[2].has_unread);
    }

    #[test]
    fn test_indicator_snapshot_merges_duplicates() {
        let chats = vec![
            ChatSummary { id: "1".into(), has_unread: true },
            ChatSummary { id: "1".into(), has_unread: false },
            ChatSummary { id: "2".into(), has_unread: false },
        ];
        let snapshot = indicator_snapshot(&chats);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[&ChatId::from("1")]);
        assert!(!snapshot[&ChatId::from("2")]);
    }
}
