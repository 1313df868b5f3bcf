//! Broadcast router for Matchcast.
//!
//! Fans one event envelope out to a channel's subscribers or to every
//! connection. Delivery is best-effort: each recipient is attempted once and a
//! failure for one recipient never affects the others.

use crate::channel::validate_channel_name;
use crate::message::{ConnectionId, Outbound};
use crate::registry::{Hub, HubError, HubState};
use matchcast_protocol::EventEnvelope;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

/// Result of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    Skipped,
    Failed,
}

/// Per-recipient outcome counts of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Frames handed to an open transport.
    pub delivered: usize,
    /// Recipients skipped because their transport was closed.
    pub skipped: usize,
    /// Recipients whose send failed.
    pub failed: usize,
}

impl BroadcastReport {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Delivered => self.delivered += 1,
            Delivery::Skipped => self.skipped += 1,
            Delivery::Failed => self.failed += 1,
        }
    }

    /// Total number of recipients considered.
    #[must_use]
    pub fn recipients(&self) -> usize {
        self.delivered + self.skipped + self.failed
    }
}

impl HubState {
    /// Deliver a frame to each listed connection, optionally excluding one.
    pub(crate) fn fan_out<'a, I>(
        &self,
        recipients: I,
        frame: &Outbound,
        exclude: Option<&str>,
    ) -> BroadcastReport
    where
        I: IntoIterator<Item = &'a ConnectionId>,
    {
        let mut report = BroadcastReport::default();
        for id in recipients {
            if exclude == Some(id.as_str()) {
                continue;
            }
            if let Some(conn) = self.connections.get(id) {
                report.record(conn.deliver(frame));
            }
        }
        report
    }
}

impl Hub {
    /// Broadcast an event.
    ///
    /// With a channel, only that channel's current subscribers receive the
    /// envelope; without one, every registered connection does. Connections
    /// that are closed, or not subscribed right now, get nothing and nothing
    /// is queued for them.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name is invalid or the envelope cannot
    /// be encoded. Per-recipient failures are counted in the report instead.
    pub fn broadcast(
        &self,
        event: &str,
        data: Value,
        channel: Option<&str>,
    ) -> Result<BroadcastReport, HubError> {
        if let Some(name) = channel {
            validate_channel_name(name).map_err(HubError::InvalidChannel)?;
        }
        let frame = Outbound::encode(&EventEnvelope::new(event, data))?;

        let state = self.lock();
        let report = match channel {
            Some(name) => match state.channels.get(name) {
                Some(entry) => state.fan_out(entry.subscribers(), &frame, None),
                None => {
                    trace!(channel = %name, event = %event, "Broadcast to channel without subscribers");
                    BroadcastReport::default()
                }
            },
            None => state.fan_out(state.connections.keys(), &frame, None),
        };
        drop(state);

        debug!(
            event = %event,
            channel = channel.unwrap_or("*"),
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "Broadcast"
        );
        Ok(report)
    }

    /// Broadcast an event to one channel.
    ///
    /// # Errors
    ///
    /// See [`Hub::broadcast`].
    pub fn broadcast_to(
        &self,
        channel: &str,
        event: &str,
        data: Value,
    ) -> Result<BroadcastReport, HubError> {
        self.broadcast(event, data, Some(channel))
    }

    /// Broadcast an event to every connection.
    ///
    /// # Errors
    ///
    /// See [`Hub::broadcast`].
    pub fn broadcast_all(&self, event: &str, data: Value) -> Result<BroadcastReport, HubError> {
        self.broadcast(event, data, None)
    }
}
