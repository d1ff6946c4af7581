//! Error taxonomy for core session operations.

use thiserror::Error;

use roomcast_protocol::kinds;

use crate::auth::AuthError;

/// Ledger or directory I/O failure.
///
/// Surfaced to the caller as a transient fault. The core does not retry:
/// retry safety depends on whether the failed operation was idempotent,
/// which only the caller can know.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct StorageError(pub String);

impl StorageError {
    /// Create a new storage error with the given detail.
    #[must_use]
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// Failures of session operations.
///
/// Every error is reported to the originating connection with a stable
/// kind tag (see [`SessionError::kind`]) and human-readable detail. Only
/// an authentication failure during the initial handshake terminates the
/// connection; all other errors leave the session in its prior state.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Room name violates the allowed grammar.
    #[error("Invalid room name: {0}")]
    InvalidRoomName(&'static str),

    /// Message text is empty or exceeds the length bound.
    #[error("Invalid message text: {0}")]
    InvalidText(&'static str),

    /// Room does not exist. Membership is unchanged.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// The connection is not currently joined to the addressed room.
    #[error("Not a member of room: {0}")]
    NotAMember(String),

    /// No session exists for this connection.
    #[error("No session for this connection")]
    UnknownConnection,

    /// Credential verification failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Backend I/O failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    /// Stable wire tag for this error.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::InvalidRoomName(_) | SessionError::InvalidText(_) => kinds::VALIDATION,
            SessionError::RoomNotFound(_) => kinds::NOT_FOUND,
            SessionError::NotAMember(_) | SessionError::UnknownConnection => kinds::STATE,
            SessionError::Auth(_) => kinds::AUTH,
            SessionError::Storage(_) => kinds::STORAGE,
        }
    }
}
