//! Codec for encoding and decoding roomcast events.
//!
//! Events travel as single JSON text frames over the connection. Decoding
//! is the single schema-validation step at the boundary: a frame either
//! parses into a typed event or is rejected before any business logic runs.

use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Maximum inbound frame size in bytes.
///
/// Message text is bounded at 1000 characters, so anything near this limit
/// is garbage rather than a legitimate command.
pub const MAX_FRAME_SIZE: usize = 8 * 1024;

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON did not match the event schema.
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode a client command from a text frame.
///
/// # Errors
///
/// Returns an error if the frame is oversized or does not match the
/// [`ClientEvent`] schema.
pub fn decode_client(text: &str) -> Result<ClientEvent, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a client command to a text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_client(event: &ClientEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Decode a server event from a text frame.
///
/// # Errors
///
/// Returns an error if the frame is oversized or does not match the
/// [`ServerEvent`] schema.
pub fn decode_server(text: &str) -> Result<ServerEvent, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a server event to a text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_server(event: &ServerEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::kinds;

    #[test]
    fn test_decode_client_commands() {
        let event = decode_client(r#"{"type":"join","room":"general"}"#).unwrap();
        assert_eq!(event, ClientEvent::join("general"));

        let event = decode_client(r#"{"type":"leave","room":"general"}"#).unwrap();
        assert_eq!(event, ClientEvent::leave("general"));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(decode_client(r#"{"type":"shout","room":"general"}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        assert!(decode_client(r#"{"type":"send","room":"general"}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let text = format!(
            r#"{{"type":"send","room":"general","text":"{}"}}"#,
            "x".repeat(MAX_FRAME_SIZE)
        );
        assert!(matches!(
            decode_client(&text),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_server_event_roundtrip() {
        let event = ServerEvent::error(kinds::STATE, "not a member of room: general");
        let encoded = encode_server(&event).unwrap();
        assert_eq!(decode_server(&encoded).unwrap(), event);
    }
}
