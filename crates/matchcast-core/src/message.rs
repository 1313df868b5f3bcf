//! Outbound frames and connection identifiers.

use matchcast_protocol::{codec, ProtocolError};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// A unique connection identifier.
pub type ConnectionId = String;

/// Generate a unique connection ID.
///
/// IDs are `conn_` followed by a random UUIDv4 in simple (hyphen-less) form.
#[must_use]
pub fn generate_connection_id() -> ConnectionId {
    format!("conn_{}", Uuid::new_v4().simple())
}

/// A frame queued for delivery to a single connection.
///
/// Text is encoded once and shared across every recipient of a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Application message (JSON text).
    Text(Arc<str>),
    /// Transport-level liveness probe.
    Ping,
    /// Close the transport.
    Close,
}

impl Outbound {
    /// Encode a serializable message into a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode<T: Serialize>(message: &T) -> Result<Self, ProtocolError> {
        Ok(Outbound::Text(codec::encode(message)?.into()))
    }

    /// Get the text of a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Outbound::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchcast_protocol::RoomFrame;

    #[test]
    fn test_unique_connection_ids() {
        let id1 = generate_connection_id();
        let id2 = generate_connection_id();
        assert_ne!(id1, id2);
        assert!(id1.starts_with("conn_"));
        assert_eq!(id1.len(), "conn_".len() + 32);
    }

    #[test]
    fn test_outbound_encode() {
        let frame = Outbound::encode(&RoomFrame::user_joined("conn_a", "room1")).unwrap();
        let text = frame.as_text().unwrap();
        assert!(text.contains("\"user_joined\""));
        assert_eq!(Outbound::Ping.as_text(), None);
    }
}
