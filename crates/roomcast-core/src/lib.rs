//! # roomcast-core
//!
//! Session, room, and broadcast management for the roomcast messaging
//! layer.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Auth** - Bearer-token verification yielding a connection identity
//! - **Registry** - The per-connection state machine and room membership
//! - **Dispatcher** - Fan-out of events to a room's current subscribers
//! - **Ledger** - The append + range-query contract over messages
//! - **Room** - Room-name grammar and the room-existence oracle
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌─────────────┐
//! │  Connection │────▶│ Session Registry │────▶│ Dispatcher  │
//! └─────────────┘     └──────────────────┘     └─────────────┘
//!                        │      │      │
//!                        ▼      ▼      ▼
//!                  ┌────────┐ ┌──────┐ ┌────────┐
//!                  │Verifier│ │Rooms │ │ Ledger │
//!                  └────────┘ └──────┘ └────────┘
//! ```
//!
//! The registry owns all connection state; the verifier, room directory,
//! and ledger are injected ports whose production backends live outside
//! the core.

pub mod auth;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod registry;
pub mod room;

pub use auth::{AuthError, Identity, IdentityResolver, JwtVerifier, TokenVerifier};
pub use dispatch::{Dispatcher, OutboundSender};
pub use error::{SessionError, StorageError};
pub use ledger::{
    validate_text, InMemoryMessageLedger, MessageLedger, StoredMessage, DEFAULT_HISTORY_LIMIT,
    MAX_TEXT_LENGTH,
};
pub use registry::{ConnectionId, RegistryConfig, SessionRegistry};
pub use room::{validate_room_name, InMemoryRoomDirectory, RoomDirectory, MAX_ROOM_NAME_LENGTH};
