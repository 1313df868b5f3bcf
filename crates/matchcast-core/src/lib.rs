//! # matchcast-core
//!
//! Connection registry, channels, rooms, heartbeat and broadcast routing for
//! the Matchcast realtime layer.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Hub** - Registry of live connections and the tables that reference them
//! - **Channel** - Named topic that receives broadcasts
//! - **Room** - Membership group for peer relay
//! - **Router** - Event fan-out to a channel or to everyone
//! - **Heartbeat** - Liveness probing and eviction of silent connections
//! - **Link** - The handle through which the hub reaches a transport
//!
//! ## Architecture
//!
//! ```text
//!  transport ──dispatch──▶ ┌───────────────────────────┐
//!                          │            Hub            │
//!  HTTP      ──broadcast─▶ │ connections channels rooms│ ──Link::send──▶ transport
//!                          └───────────────────────────┘
//!                                       ▲
//!                          HeartbeatMonitor (sweep)
//! ```

pub mod channel;
pub mod heartbeat;
pub mod link;
pub mod message;
pub mod registry;
pub mod room;
pub mod router;

pub use channel::{validate_channel_name, Channel, ChannelId};
pub use heartbeat::{HeartbeatMonitor, SweepReport, DEFAULT_HEARTBEAT_INTERVAL};
pub use link::{Link, LinkError, RecordingLink};
pub use message::{generate_connection_id, ConnectionId, Outbound};
pub use registry::{
    ConnectionInfo, DispatchOutcome, Hub, HubConfig, HubError, HubStats, Liveness,
};
pub use room::{validate_room_id, Room, RoomId};
pub use router::BroadcastReport;
