//! Logical events exchanged over a room connection.
//!
//! Commands flow client→server, events flow server→client. Both are
//! internally tagged so the `type` field of a frame selects the variant.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable machine-readable error kind tags.
///
/// Every error frame carries exactly one of these so clients can branch
/// without parsing the human-readable message.
pub mod kinds {
    /// Credential missing, malformed, expired, or unresolvable. Fatal to
    /// the connection attempt.
    pub const AUTH: &str = "auth";
    /// Malformed room name or message text. The client may retry with
    /// corrected input.
    pub const VALIDATION: &str = "validation";
    /// The room does not exist. Membership is unchanged.
    pub const NOT_FOUND: &str = "not_found";
    /// Operation attempted outside the required session state.
    pub const STATE: &str = "state";
    /// Transient failure in the ledger or directory backend.
    pub const STORAGE: &str = "storage";
}

/// A single chat message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Store-assigned identifier.
    pub id: Uuid,
    /// Room the message belongs to.
    pub room: String,
    /// Opaque user id of the author.
    pub author_id: String,
    /// Display name of the author.
    pub author_name: String,
    /// Message text.
    pub text: String,
    /// Server-assigned timestamp, unix milliseconds.
    pub timestamp: u64,
}

/// Commands a client may issue on an established connection.
///
/// Authentication is not a command: the bearer credential is carried once
/// at connection establishment, not re-sent per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join a room, releasing the current membership if any.
    Join { room: String },
    /// Leave a room. A no-op if not currently joined to it.
    Leave { room: String },
    /// Send a message to a room the connection is currently joined to.
    Send { room: String, text: String },
}

/// Events the server pushes to a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Recent history of a room, oldest first, sent after a successful join.
    History {
        room: String,
        messages: Vec<ChatMessage>,
    },
    /// A persisted message fanned out to the room's subscribers.
    Delivered { room: String, message: ChatMessage },
    /// Another participant joined the room.
    ParticipantJoined {
        room: String,
        user_id: String,
        display_name: String,
    },
    /// An operation failed. `kind` is one of [`kinds`].
    Error { kind: String, message: String },
}

impl ClientEvent {
    /// Create a new Join command.
    #[must_use]
    pub fn join(room: impl Into<String>) -> Self {
        ClientEvent::Join { room: room.into() }
    }

    /// Create a new Leave command.
    #[must_use]
    pub fn leave(room: impl Into<String>) -> Self {
        ClientEvent::Leave { room: room.into() }
    }

    /// Create a new Send command.
    #[must_use]
    pub fn send(room: impl Into<String>, text: impl Into<String>) -> Self {
        ClientEvent::Send {
            room: room.into(),
            text: text.into(),
        }
    }
}

impl ServerEvent {
    /// Create a new History event.
    #[must_use]
    pub fn history(room: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        ServerEvent::History {
            room: room.into(),
            messages,
        }
    }

    /// Create a new Delivered event.
    #[must_use]
    pub fn delivered(message: ChatMessage) -> Self {
        ServerEvent::Delivered {
            room: message.room.clone(),
            message,
        }
    }

    /// Create a new ParticipantJoined event.
    #[must_use]
    pub fn participant_joined(
        room: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        ServerEvent::ParticipantJoined {
            room: room.into(),
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Create a new Error event.
    #[must_use]
    pub fn error(kind: &'static str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}
