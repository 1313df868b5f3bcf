//! Message types for the Matchcast protocol.
//!
//! Clients send JSON objects tagged with a `type` field. The server answers
//! with two families of frames: event envelopes (channel and global
//! broadcasts) and room frames (membership notices and relayed commentary).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name of the greeting sent when a connection is accepted.
pub const CONNECTED_EVENT: &str = "connected";

// ============================================================================
// Client → Server Messages
// ============================================================================

/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to a named channel.
    Subscribe {
        /// Channel name.
        channel: String,
    },

    /// Unsubscribe from a named channel.
    Unsubscribe {
        /// Channel name.
        channel: String,
    },

    /// Join a room.
    JoinRoom {
        /// Room identifier.
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// Leave a room.
    LeaveRoom {
        /// Room identifier.
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// Relay a payload to every member of a room.
    Commentary {
        /// Room identifier.
        #[serde(rename = "roomId")]
        room_id: String,
        /// Arbitrary payload, relayed untouched.
        #[serde(default)]
        payload: Value,
    },

    /// A well-formed envelope whose `type` tag is not recognized.
    ///
    /// Never produced by serde; [`crate::codec::decode`] builds it so the
    /// unknown tag can be reported.
    #[serde(skip)]
    Unrecognized(String),
}

impl ClientMessage {
    /// Every `type` tag the server understands.
    pub const KNOWN_TYPES: [&'static str; 5] = [
        "subscribe",
        "unsubscribe",
        "join_room",
        "leave_room",
        "commentary",
    ];

    /// Get the `type` tag of this message.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            ClientMessage::Subscribe { .. } => "subscribe",
            ClientMessage::Unsubscribe { .. } => "unsubscribe",
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::LeaveRoom { .. } => "leave_room",
            ClientMessage::Commentary { .. } => "commentary",
            ClientMessage::Unrecognized(kind) => kind,
        }
    }

    /// Create a subscribe message.
    #[must_use]
    pub fn subscribe(channel: impl Into<String>) -> Self {
        ClientMessage::Subscribe {
            channel: channel.into(),
        }
    }

    /// Create an unsubscribe message.
    #[must_use]
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        ClientMessage::Unsubscribe {
            channel: channel.into(),
        }
    }

    /// Create a join_room message.
    #[must_use]
    pub fn join_room(room_id: impl Into<String>) -> Self {
        ClientMessage::JoinRoom {
            room_id: room_id.into(),
        }
    }

    /// Create a leave_room message.
    #[must_use]
    pub fn leave_room(room_id: impl Into<String>) -> Self {
        ClientMessage::LeaveRoom {
            room_id: room_id.into(),
        }
    }

    /// Create a commentary message.
    #[must_use]
    pub fn commentary(room_id: impl Into<String>, payload: Value) -> Self {
        ClientMessage::Commentary {
            room_id: room_id.into(),
            payload,
        }
    }
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Envelope for channel and global broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event type, e.g. `"score_update"`.
    pub event: String,
    /// Event payload.
    pub data: Value,
    /// Creation time, serialized as RFC 3339 / ISO-8601.
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Create an envelope stamped with the current time.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Create the greeting sent to a freshly accepted connection.
    #[must_use]
    pub fn connected(client_id: &str, heartbeat_ms: u64) -> Self {
        Self::new(
            CONNECTED_EVENT,
            serde_json::json!({
                "clientId": client_id,
                "heartbeatMs": heartbeat_ms,
            }),
        )
    }
}

/// Frames produced by the room relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomFrame {
    /// Another connection joined a room this connection belongs to.
    UserJoined {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// Another connection left a room this connection belongs to.
    UserLeft {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "roomId")]
        room_id: String,
    },

    /// Commentary relayed to the whole room.
    Commentary {
        /// Connection that sent the commentary.
        from: String,
        /// Payload as sent.
        payload: Value,
    },
}

impl RoomFrame {
    /// Create a `user_joined` notice.
    #[must_use]
    pub fn user_joined(client_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        RoomFrame::UserJoined {
            client_id: client_id.into(),
            room_id: room_id.into(),
        }
    }

    /// Create a `user_left` notice.
    #[must_use]
    pub fn user_left(client_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        RoomFrame::UserLeft {
            client_id: client_id.into(),
            room_id: room_id.into(),
        }
    }

    /// Create a relayed commentary frame.
    #[must_use]
    pub fn commentary(from: impl Into<String>, payload: Value) -> Self {
        RoomFrame::Commentary {
            from: from.into(),
            payload,
        }
    }
}
