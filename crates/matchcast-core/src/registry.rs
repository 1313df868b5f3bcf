//! Connection registry for Matchcast.
//!
//! The [`Hub`] owns every live connection together with the channel and room
//! tables that reference them. All three tables sit behind one mutex so that
//! removing a connection is atomic with respect to any fan-out in progress.
//! Channel, room, broadcast and heartbeat operations are implemented on the
//! hub in their own modules.

use crate::channel::{Channel, ChannelId};
use crate::link::Link;
use crate::message::{generate_connection_id, ConnectionId, Outbound};
use crate::room::{Room, RoomId};
use crate::router::{BroadcastReport, Delivery};
use chrono::{DateTime, Utc};
use matchcast_protocol::{codec, ClientMessage, ProtocolError, RoomFrame};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// Invalid room identifier.
    #[error("Invalid room id: {0}")]
    InvalidRoom(&'static str),

    /// The connection is not registered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// Maximum subscriptions reached.
    #[error("Maximum subscriptions reached")]
    MaxSubscriptionsReached,

    /// Maximum channels reached.
    #[error("Maximum channels reached")]
    MaxChannelsReached,

    /// Maximum room memberships reached for this connection.
    #[error("Maximum room memberships reached")]
    MaxRoomMembershipsReached,

    /// Maximum rooms reached.
    #[error("Maximum rooms reached")]
    MaxRoomsReached,

    /// An outbound message could not be encoded.
    #[error("Encoding failed: {0}")]
    Encode(#[from] ProtocolError),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of channels.
    pub max_channels: usize,
    /// Maximum subscriptions per connection.
    pub max_subscriptions_per_connection: usize,
    /// Maximum number of rooms.
    pub max_rooms: usize,
    /// Maximum rooms a single connection can be a member of.
    pub max_rooms_per_connection: usize,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Send `user_left` to remaining room members when a connection goes
    /// away without leaving its rooms first.
    pub notify_rooms_on_disconnect: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_channels: 10_000,
            max_subscriptions_per_connection: 100,
            max_rooms: 10_000,
            max_rooms_per_connection: 100,
            max_message_size: codec::MAX_MESSAGE_SIZE,
            notify_rooms_on_disconnect: false,
        }
    }
}

/// Liveness state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Proved alive since the last heartbeat tick.
    Alive,
    /// Probed and not yet answered.
    Pending,
}

/// A registered connection.
pub(crate) struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) link: Arc<dyn Link>,
    pub(crate) liveness: Liveness,
    pub(crate) created_at: DateTime<Utc>,
    /// Channels this connection is subscribed to.
    pub(crate) channels: HashSet<ChannelId>,
    /// Rooms this connection is a member of.
    pub(crate) rooms: HashSet<RoomId>,
}

impl Connection {
    fn new(id: ConnectionId, link: Arc<dyn Link>) -> Self {
        Self {
            id,
            link,
            liveness: Liveness::Alive,
            created_at: Utc::now(),
            channels: HashSet::new(),
            rooms: HashSet::new(),
        }
    }

    /// Hand a frame to this connection's link.
    ///
    /// Closed links are skipped; send failures are logged and reported, never
    /// propagated.
    pub(crate) fn deliver(&self, frame: &Outbound) -> Delivery {
        if !self.link.is_open() {
            trace!(connection = %self.id, "Skipping closed connection");
            return Delivery::Skipped;
        }
        match self.link.send(frame.clone()) {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                warn!(connection = %self.id, error = %e, "Send failed");
                Delivery::Failed
            }
        }
    }
}

/// Point-in-time view of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection ID.
    pub id: ConnectionId,
    /// Current liveness state.
    pub liveness: Liveness,
    /// When the connection was registered.
    pub created_at: DateTime<Utc>,
    /// Subscribed channels, sorted.
    pub channels: Vec<ChannelId>,
    /// Joined rooms, sorted.
    pub rooms: Vec<RoomId>,
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Number of registered connections.
    pub connections: usize,
    /// Number of non-empty channels.
    pub channels: usize,
    /// Number of non-empty rooms.
    pub rooms: usize,
    /// Total number of channel subscriptions.
    pub subscriptions: usize,
}

/// Outcome of dispatching one inbound client message.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The message was routed and applied.
    Handled,
    /// The input could not be decoded.
    Malformed(ProtocolError),
    /// The envelope carried a `type` tag nobody handles.
    Unrecognized(String),
    /// The message was understood but the operation was refused.
    Rejected(HubError),
}

/// The shared tables.
#[derive(Default)]
pub(crate) struct HubState {
    pub(crate) connections: HashMap<ConnectionId, Connection>,
    pub(crate) channels: HashMap<ChannelId, Channel>,
    pub(crate) rooms: HashMap<RoomId, Room>,
}

impl HubState {
    /// Remove a connection from every table and close its link.
    pub(crate) fn remove_connection(
        &mut self,
        connection_id: &str,
        notify_rooms: bool,
    ) -> Option<Connection> {
        let conn = self.connections.remove(connection_id)?;

        for channel_name in &conn.channels {
            let now_empty = match self.channels.get_mut(channel_name) {
                Some(channel) => {
                    channel.unsubscribe(connection_id);
                    channel.is_empty()
                }
                None => continue,
            };
            if now_empty {
                self.channels.remove(channel_name);
                debug!(channel = %channel_name, "Deleted empty channel");
            }
        }

        for room_id in &conn.rooms {
            let now_empty = match self.rooms.get_mut(room_id) {
                Some(room) => {
                    room.leave(connection_id);
                    room.is_empty()
                }
                None => continue,
            };
            if now_empty {
                self.rooms.remove(room_id);
                debug!(room = %room_id, "Deleted empty room");
            } else if notify_rooms {
                match Outbound::encode(&RoomFrame::user_left(connection_id, room_id)) {
                    Ok(frame) => {
                        self.fan_out_room(room_id, &frame, None);
                    }
                    Err(e) => warn!(room = %room_id, error = %e, "Failed to encode user_left"),
                }
            }
        }

        if conn.link.is_open() {
            conn.link.close();
        }

        Some(conn)
    }

    /// Send a frame to the members of a room.
    pub(crate) fn fan_out_room(
        &self,
        room_id: &str,
        frame: &Outbound,
        exclude: Option<&str>,
    ) -> BroadcastReport {
        match self.rooms.get(room_id) {
            Some(room) => self.fan_out(room.members(), frame, exclude),
            None => BroadcastReport::default(),
        }
    }
}

/// The connection hub.
///
/// Create one per process (or per test), share it as `Arc<Hub>` with every
/// handler, and call [`Hub::shutdown`] when the process stops.
pub struct Hub {
    state: Mutex<HubState>,
    config: HubConfig,
}

impl Hub {
    /// Create a new hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a new hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            state: Mutex::new(HubState::default()),
            config,
        }
    }

    /// Get the hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a transport and return its new connection ID.
    pub fn register(&self, link: Arc<dyn Link>) -> ConnectionId {
        let id = generate_connection_id();
        let mut state = self.lock();
        state
            .connections
            .insert(id.clone(), Connection::new(id.clone(), link));
        debug!(
            connection = %id,
            connections = state.connections.len(),
            "Registered connection"
        );
        id
    }

    /// Unregister a connection: leave every channel and room, close the link,
    /// and forget the connection.
    ///
    /// Returns `false` if the connection was not registered.
    pub fn unregister(&self, connection_id: &str) -> bool {
        let removed = self
            .lock()
            .remove_connection(connection_id, self.config.notify_rooms_on_disconnect)
            .is_some();
        if removed {
            debug!(connection = %connection_id, "Unregistered connection");
        }
        removed
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn contains(&self, connection_id: &str) -> bool {
        self.lock().connections.contains_key(connection_id)
    }

    /// Get the number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Get a snapshot of one connection.
    #[must_use]
    pub fn connection_info(&self, connection_id: &str) -> Option<ConnectionInfo> {
        let state = self.lock();
        let conn = state.connections.get(connection_id)?;

        let mut channels: Vec<_> = conn.channels.iter().cloned().collect();
        channels.sort();
        let mut rooms: Vec<_> = conn.rooms.iter().cloned().collect();
        rooms.sort();

        Some(ConnectionInfo {
            id: conn.id.clone(),
            liveness: conn.liveness,
            created_at: conn.created_at,
            channels,
            rooms,
        })
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let state = self.lock();
        HubStats {
            connections: state.connections.len(),
            channels: state.channels.len(),
            rooms: state.rooms.len(),
            subscriptions: state
                .channels
                .values()
                .map(Channel::subscriber_count)
                .sum(),
        }
    }

    /// Decode and apply a raw text message from a connection.
    ///
    /// Protocol errors are logged and reported; they never close the
    /// connection.
    pub fn dispatch(&self, connection_id: &str, raw: &str) -> DispatchOutcome {
        match codec::decode_with_limit(raw, self.config.max_message_size) {
            Ok(message) => self.dispatch_message(connection_id, message),
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Discarding malformed message");
                DispatchOutcome::Malformed(e)
            }
        }
    }

    /// Decode and apply a raw binary message from a connection.
    pub fn dispatch_bytes(&self, connection_id: &str, data: &[u8]) -> DispatchOutcome {
        match codec::decode_bytes(data, self.config.max_message_size) {
            Ok(message) => self.dispatch_message(connection_id, message),
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Discarding malformed message");
                DispatchOutcome::Malformed(e)
            }
        }
    }

    /// Apply a decoded client message.
    pub fn dispatch_message(&self, connection_id: &str, message: ClientMessage) -> DispatchOutcome {
        if !self.contains(connection_id) {
            return DispatchOutcome::Rejected(HubError::UnknownConnection(
                connection_id.to_string(),
            ));
        }

        trace!(connection = %connection_id, kind = %message.kind(), "Dispatching message");

        let result = match message {
            ClientMessage::Subscribe { channel } => {
                self.subscribe(connection_id, &channel).map(drop)
            }
            ClientMessage::Unsubscribe { channel } => {
                self.unsubscribe(connection_id, &channel).map(drop)
            }
            ClientMessage::JoinRoom { room_id } => self.join(connection_id, &room_id).map(drop),
            ClientMessage::LeaveRoom { room_id } => self.leave(connection_id, &room_id).map(drop),
            ClientMessage::Commentary { room_id, payload } => {
                self.relay(&room_id, connection_id, payload).map(drop)
            }
            ClientMessage::Unrecognized(kind) => {
                warn!(connection = %connection_id, kind = %kind, "Ignoring unrecognized message type");
                return DispatchOutcome::Unrecognized(kind);
            }
        };

        match result {
            Ok(()) => DispatchOutcome::Handled,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Rejected client message");
                DispatchOutcome::Rejected(e)
            }
        }
    }

    /// Close every open connection and clear all tables.
    ///
    /// Returns the number of connections that were registered.
    pub fn shutdown(&self) -> usize {
        let mut state = self.lock();
        let count = state.connections.len();

        for conn in state.connections.values() {
            if conn.link.is_open() {
                conn.link.close();
            }
        }
        state.connections.clear();
        state.channels.clear();
        state.rooms.clear();

        info!(connections = count, "Hub shut down");
        count
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
