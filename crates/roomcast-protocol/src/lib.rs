//! # roomcast-protocol
//!
//! Wire protocol definitions for the roomcast messaging layer.
//!
//! This crate defines the logical events exchanged over a persistent room
//! connection, serialized as JSON text frames.
//!
//! ## Events
//!
//! - `Join` / `Leave` - Room membership commands
//! - `Send` - Send a text message to the joined room
//! - `History` / `Delivered` - Room history and live message delivery
//! - `ParticipantJoined` / `Error` - Membership notifications and failures
//!
//! ## Example
//!
//! ```rust
//! use roomcast_protocol::{codec, ClientEvent};
//!
//! let command = ClientEvent::send("general", "Hello, world!");
//!
//! let encoded = codec::encode_client(&command).unwrap();
//! let decoded = codec::decode_client(&encoded).unwrap();
//! assert_eq!(command, decoded);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode_client, encode_server, ProtocolError, MAX_FRAME_SIZE};
pub use events::{kinds, ChatMessage, ClientEvent, ServerEvent};
