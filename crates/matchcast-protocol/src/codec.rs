//! Codec for encoding and decoding Matchcast messages.
//!
//! Messages travel as JSON text frames. Decoding is two-step: the raw text
//! is parsed into a JSON value first so that an envelope with an unknown
//! `type` tag can be told apart from malformed input.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::messages::ClientMessage;

/// Maximum inbound message size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds the size limit.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Limit that was exceeded.
        max: usize,
    },

    /// Input is not valid JSON or does not match the expected shape.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Input is a JSON value without a string `type` tag.
    #[error("Message has no type tag")]
    MissingType,

    /// Input is not valid UTF-8.
    #[error("Message is not valid UTF-8")]
    InvalidUtf8,
}

/// Encode an outbound message to JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a client message using the default size limit.
///
/// # Errors
///
/// Returns an error if the input is too large, not JSON, has no `type` tag,
/// or is a recognized type with missing or mistyped fields. An unknown
/// `type` tag is not an error: it decodes to [`ClientMessage::Unrecognized`].
pub fn decode(raw: &str) -> Result<ClientMessage, ProtocolError> {
    decode_with_limit(raw, MAX_MESSAGE_SIZE)
}

/// Decode a client message, rejecting input larger than `max_size` bytes.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_with_limit(raw: &str, max_size: usize) -> Result<ClientMessage, ProtocolError> {
    if raw.len() > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: raw.len(),
            max: max_size,
        });
    }

    let value: Value = serde_json::from_str(raw)?;
    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        _ => return Err(ProtocolError::MissingType),
    };

    if !ClientMessage::KNOWN_TYPES.contains(&kind.as_str()) {
        return Ok(ClientMessage::Unrecognized(kind));
    }

    Ok(serde_json::from_value(value)?)
}

/// Decode a client message from a binary frame.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUtf8`] if the bytes are not UTF-8, and
/// otherwise the same errors as [`decode_with_limit`].
pub fn decode_bytes(data: &[u8], max_size: usize) -> Result<ClientMessage, ProtocolError> {
    if data.len() > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max: max_size,
        });
    }
    let raw = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)?;
    decode_with_limit(raw, max_size)
}
