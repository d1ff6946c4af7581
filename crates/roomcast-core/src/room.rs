//! Room directory and room-name validation.
//!
//! Rooms are named, pre-existing channels. The core never creates rooms; it
//! only checks an existence oracle backed by the external room store.

use async_trait::async_trait;
use dashmap::DashSet;

use crate::error::StorageError;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 50;

/// Validate a room name.
///
/// Names are 1-50 characters from letters, digits, hyphen, underscore.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

/// Existence lookup for room names. Read-only from the core's perspective.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Whether a room with this name exists in the external room store.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the store cannot be reached.
    async fn exists(&self, room: &str) -> Result<bool, StorageError>;
}

/// In-memory directory over a seeded room set.
#[derive(Debug, Default)]
pub struct InMemoryRoomDirectory {
    rooms: DashSet<String>,
}

impl InMemoryRoomDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory seeded with the given room names.
    #[must_use]
    pub fn with_rooms<I, S>(rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let directory = Self::new();
        for room in rooms {
            directory.rooms.insert(room.into());
        }
        directory
    }

    /// Seed a room. Room administration proper lives outside the core.
    pub fn insert(&self, room: impl Into<String>) {
        self.rooms.insert(room.into());
    }
}

#[async_trait]
impl RoomDirectory for InMemoryRoomDirectory {
    async fn exists(&self, room: &str) -> Result<bool, StorageError> {
        Ok(self.rooms.contains(room))
    }
}
