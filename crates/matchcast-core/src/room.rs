//! Room relay for Matchcast.
//!
//! Rooms are ephemeral membership groups used for peer-scoped relay, such as
//! live commentary between viewers of one match. They are independent of
//! channels: a connection can sit in any number of both.
//!
//! Membership changes are announced to the *other* members of the room,
//! while commentary is addressed to the room itself and so also reaches the
//! sender.

use crate::channel::validate_identifier;
use crate::message::{ConnectionId, Outbound};
use crate::registry::{Hub, HubError};
use crate::router::BroadcastReport;
use matchcast_protocol::RoomFrame;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, trace};

/// A room identifier.
pub type RoomId = String;

/// Validate a room identifier. Rooms follow the channel naming rules.
///
/// # Errors
///
/// Returns an error message if the room id is invalid.
pub fn validate_room_id(room_id: &str) -> Result<(), &'static str> {
    validate_identifier(room_id)
}

/// A room and its members.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashSet<ConnectionId>,
}

impl Room {
    /// Create a new, empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            members: HashSet::new(),
        }
    }

    /// Get the room id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a member. Returns `true` if it was not already a member.
    pub fn join(&mut self, connection_id: impl Into<ConnectionId>) -> bool {
        self.members.insert(connection_id.into())
    }

    /// Remove a member. Returns `true` if it was a member.
    pub fn leave(&mut self, connection_id: &str) -> bool {
        self.members.remove(connection_id)
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn is_member(&self, connection_id: &str) -> bool {
        self.members.contains(connection_id)
    }

    /// Iterate over member IDs.
    pub fn members(&self) -> impl Iterator<Item = &ConnectionId> {
        self.members.iter()
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if the room is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Hub {
    /// Add a connection to a room and announce it to the other members.
    ///
    /// Joining a room twice is a silent no-op; returns `true` only for a new
    /// membership.
    ///
    /// # Errors
    ///
    /// Returns an error if the room id is invalid, the connection is
    /// unknown, or a room limit is exceeded.
    pub fn join(&self, connection_id: &str, room_id: &str) -> Result<bool, HubError> {
        validate_room_id(room_id).map_err(HubError::InvalidRoom)?;
        let notice = Outbound::encode(&RoomFrame::user_joined(connection_id, room_id))?;

        let mut guard = self.lock();
        let state = &mut *guard;
        let conn = state
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| HubError::UnknownConnection(connection_id.to_string()))?;
        if conn.rooms.contains(room_id) {
            return Ok(false);
        }
        if conn.rooms.len() >= self.config().max_rooms_per_connection {
            return Err(HubError::MaxRoomMembershipsReached);
        }
        if !state.rooms.contains_key(room_id) && state.rooms.len() >= self.config().max_rooms {
            return Err(HubError::MaxRoomsReached);
        }

        conn.rooms.insert(room_id.to_string());

        let room = state.rooms.entry(room_id.to_string()).or_insert_with(|| {
            debug!(room = %room_id, "Creating new room");
            Room::new(room_id)
        });
        room.join(connection_id);
        let members = room.member_count();

        let report = state.fan_out_room(room_id, &notice, Some(connection_id));
        debug!(
            room = %room_id,
            connection = %connection_id,
            members,
            notified = report.delivered,
            "Joined room"
        );
        Ok(true)
    }

    /// Remove a connection from a room and announce it to the remaining
    /// members. The room is deleted once empty.
    ///
    /// Returns `false` if the connection was not a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the room id is invalid or the connection is
    /// unknown.
    pub fn leave(&self, connection_id: &str, room_id: &str) -> Result<bool, HubError> {
        validate_room_id(room_id).map_err(HubError::InvalidRoom)?;
        let notice = Outbound::encode(&RoomFrame::user_left(connection_id, room_id))?;

        let mut state = self.lock();
        let conn = state
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| HubError::UnknownConnection(connection_id.to_string()))?;
        if !conn.rooms.remove(room_id) {
            return Ok(false);
        }

        let now_empty = match state.rooms.get_mut(room_id) {
            Some(room) => {
                room.leave(connection_id);
                room.is_empty()
            }
            None => true,
        };

        if now_empty {
            state.rooms.remove(room_id);
            debug!(room = %room_id, connection = %connection_id, "Left room; deleted empty room");
        } else {
            let report = state.fan_out_room(room_id, &notice, None);
            debug!(
                room = %room_id,
                connection = %connection_id,
                notified = report.delivered,
                "Left room"
            );
        }
        Ok(true)
    }

    /// Relay a payload to every current member of a room, the sender
    /// included.
    ///
    /// The sender does not need to be a member; the room is the address.
    ///
    /// # Errors
    ///
    /// Returns an error if the room id is invalid or the frame cannot be
    /// encoded.
    pub fn relay(
        &self,
        room_id: &str,
        from: &str,
        payload: Value,
    ) -> Result<BroadcastReport, HubError> {
        validate_room_id(room_id).map_err(HubError::InvalidRoom)?;
        let frame = Outbound::encode(&RoomFrame::commentary(from, payload))?;

        let report = self.lock().fan_out_room(room_id, &frame, None);
        trace!(
            room = %room_id,
            from = %from,
            delivered = report.delivered,
            "Relayed commentary"
        );
        Ok(report)
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.lock().rooms.contains_key(room_id)
    }

    /// Get the member count of a room.
    #[must_use]
    pub fn room_member_count(&self, room_id: &str) -> usize {
        self.lock()
            .rooms
            .get(room_id)
            .map(Room::member_count)
            .unwrap_or(0)
    }

    /// Check if a connection is a member of a room.
    #[must_use]
    pub fn is_room_member(&self, connection_id: &str, room_id: &str) -> bool {
        self.lock()
            .rooms
            .get(room_id)
            .is_some_and(|room| room.is_member(connection_id))
    }
}
