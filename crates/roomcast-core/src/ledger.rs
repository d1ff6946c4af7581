//! Message ledger: the append + range-query contract over messages.
//!
//! The ledger assigns timestamps and identifiers at append time; client
//! clocks are never trusted, which keeps history free of clock-skew
//! reordering. Messages are immutable once stored.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::trace;
use uuid::Uuid;

use roomcast_protocol::ChatMessage;

use crate::auth::Identity;
use crate::error::StorageError;

/// Default number of messages returned by a history read.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Maximum message text length in characters, after trimming.
pub const MAX_TEXT_LENGTH: usize = 1000;

/// Validate and normalize message text.
///
/// Returns the trimmed text; bounds apply after surrounding whitespace is
/// removed.
///
/// # Errors
///
/// Returns an error message if the text is empty or too long.
pub fn validate_text(text: &str) -> Result<&str, &'static str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("Message text cannot be empty");
    }
    if trimmed.chars().count() > MAX_TEXT_LENGTH {
        return Err("Message text too long");
    }
    Ok(trimmed)
}

/// A message as persisted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    /// Store-assigned identifier.
    pub id: Uuid,
    /// Room the message belongs to.
    pub room: String,
    /// Author identity captured at append time.
    pub author: Identity,
    /// Message text.
    pub text: String,
    /// Server-assigned timestamp, unix milliseconds. Non-decreasing within
    /// a room.
    pub timestamp: u64,
}

impl From<&StoredMessage> for ChatMessage {
    fn from(message: &StoredMessage) -> Self {
        ChatMessage {
            id: message.id,
            room: message.room.clone(),
            author_id: message.author.user_id.clone(),
            author_name: message.author.display_name.clone(),
            text: message.text.clone(),
            timestamp: message.timestamp,
        }
    }
}

/// Append + range-query contract over messages.
#[async_trait]
pub trait MessageLedger: Send + Sync {
    /// Append a message, assigning its timestamp and identifier.
    ///
    /// The returned message is durably recorded before this call returns.
    /// Within a room, the order in which `append` calls return is the
    /// order subsequent [`recent`](MessageLedger::recent) calls observe.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the message store cannot be reached.
    async fn append(
        &self,
        room: &str,
        author: &Identity,
        text: &str,
    ) -> Result<StoredMessage, StorageError>;

    /// The at most `limit` most recent messages for a room, oldest first.
    ///
    /// `offset` counts back from the newest message: offset 0 is the
    /// latest window, offset `limit` the one before it.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the message store cannot be reached.
    async fn recent(
        &self,
        room: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>, StorageError>;
}

#[derive(Debug, Default)]
struct RoomLog {
    messages: Vec<StoredMessage>,
    last_timestamp: u64,
}

/// In-memory ledger keyed by room.
///
/// Appends to the same room are serialized by exclusive access to the
/// room's log, which linearizes same-room append order even under
/// concurrent senders. Timestamps are clamped to be non-decreasing per
/// room so a clock step backwards cannot reorder history.
#[derive(Debug, Default)]
pub struct InMemoryMessageLedger {
    logs: DashMap<String, RoomLog>,
}

impl InMemoryMessageLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }
}

#[async_trait]
impl MessageLedger for InMemoryMessageLedger {
    async fn append(
        &self,
        room: &str,
        author: &Identity,
        text: &str,
    ) -> Result<StoredMessage, StorageError> {
        let mut log = self.logs.entry(room.to_string()).or_default();

        let timestamp = Self::now_millis().max(log.last_timestamp);
        log.last_timestamp = timestamp;

        let message = StoredMessage {
            id: Uuid::new_v4(),
            room: room.to_string(),
            author: author.clone(),
            text: text.to_string(),
            timestamp,
        };
        log.messages.push(message.clone());

        trace!(room = %room, author = %author.user_id, "Appended message");
        Ok(message)
    }

    async fn recent(
        &self,
        room: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let Some(log) = self.logs.get(room) else {
            return Ok(Vec::new());
        };

        let messages = &log.messages;
        let end = messages.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        Ok(messages[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity {
            user_id: "u-alice".to_string(),
            display_name: "Alice".to_string(),
        }
    }

    #[test]
    fn test_text_validation() {
        assert_eq!(validate_text("hello"), Ok("hello"));
        assert_eq!(validate_text("  hello  "), Ok("hello"));

        assert!(validate_text("").is_err());
        assert!(validate_text("   ").is_err());
        assert!(validate_text(&"x".repeat(MAX_TEXT_LENGTH + 1)).is_err());
        assert!(validate_text(&"x".repeat(MAX_TEXT_LENGTH)).is_ok());
    }

    #[tokio::test]
    async fn test_recent_is_oldest_first() {
        let ledger = InMemoryMessageLedger::new();
        for text in ["one", "two", "three"] {
            ledger.append("general", &alice(), text).await.unwrap();
        }

        let history = ledger.recent("general", 50, 0).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["one", "two", "three"]);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_recent_returns_latest_window() {
        let ledger = InMemoryMessageLedger::new();
        for i in 0..10 {
            ledger
                .append("general", &alice(), &format!("m{i}"))
                .await
                .unwrap();
        }

        let history = ledger.recent("general", 3, 0).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["m7", "m8", "m9"]);
    }

    #[tokio::test]
    async fn test_recent_offset_pages_backwards() {
        let ledger = InMemoryMessageLedger::new();
        for i in 0..10 {
            ledger
                .append("general", &alice(), &format!("m{i}"))
                .await
                .unwrap();
        }

        let page = ledger.recent("general", 3, 3).await.unwrap();
        let texts: Vec<&str> = page.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["m4", "m5", "m6"]);

        // Past the beginning the window shrinks, then empties.
        let first = ledger.recent("general", 3, 9).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(ledger.recent("general", 3, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_is_idempotent() {
        let ledger = InMemoryMessageLedger::new();
        ledger.append("general", &alice(), "hello").await.unwrap();

        let first = ledger.recent("general", 50, 0).await.unwrap();
        let second = ledger.recent("general", 50, 0).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_room_has_empty_history() {
        let ledger = InMemoryMessageLedger::new();
        assert!(ledger.recent("ghost-room", 50, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let ledger = InMemoryMessageLedger::new();
        ledger.append("general", &alice(), "here").await.unwrap();

        assert!(ledger.recent("random", 50, 0).await.unwrap().is_empty());
    }
}
