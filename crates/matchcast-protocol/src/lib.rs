//! # matchcast-protocol
//!
//! Wire protocol definitions for the Matchcast real-time broadcast layer.
//!
//! Clients and server exchange JSON text frames.
//!
//! ## Client messages
//!
//! - `subscribe` / `unsubscribe` - Channel membership
//! - `join_room` / `leave_room` - Room membership
//! - `commentary` - Relay a payload to a room
//!
//! ## Server messages
//!
//! - [`EventEnvelope`] - `{event, data, timestamp}` for channel and global broadcasts
//! - [`RoomFrame`] - `user_joined`, `user_left` and relayed `commentary`
//!
//! ## Example
//!
//! ```rust
//! use matchcast_protocol::{codec, ClientMessage};
//!
//! let msg = codec::decode(r#"{"type":"subscribe","channel":"scores"}"#).unwrap();
//! assert_eq!(msg, ClientMessage::subscribe("scores"));
//! ```

pub mod codec;
pub mod messages;

pub use codec::{decode, encode, ProtocolError};
pub use messages::{ClientMessage, EventEnvelope, RoomFrame, CONNECTED_EVENT};
