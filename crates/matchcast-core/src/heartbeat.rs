//! Heartbeat monitor for Matchcast.
//!
//! Each connection moves `Alive → Pending` on a tick (and is probed), back to
//! `Alive` when a pong arrives, and is evicted if it is still `Pending` on the
//! following tick. A silent connection therefore gets one full interval of
//! grace and is gone at most two intervals after its last sign of life.

use crate::message::{ConnectionId, Outbound};
use crate::registry::{Hub, Liveness};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest interval the monitor will run at.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Result of one heartbeat sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Connections that were sent a probe.
    pub probed: usize,
    /// Connections evicted for missing the previous probe.
    pub evicted: Vec<ConnectionId>,
}

impl Hub {
    /// Run one heartbeat tick over every connection.
    ///
    /// Connections still `Pending` from the previous tick are unregistered.
    /// All others become `Pending` and, if their transport is open, get a
    /// ping. Probe failures are ignored.
    pub fn heartbeat_sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let mut expired = Vec::new();

        let mut state = self.lock();
        for conn in state.connections.values_mut() {
            match conn.liveness {
                Liveness::Pending => expired.push(conn.id.clone()),
                Liveness::Alive => {
                    conn.liveness = Liveness::Pending;
                    if !conn.link.is_open() {
                        continue;
                    }
                    match conn.link.send(Outbound::Ping) {
                        Ok(()) => report.probed += 1,
                        Err(e) => trace!(connection = %conn.id, error = %e, "Probe failed"),
                    }
                }
            }
        }

        for id in expired {
            if state
                .remove_connection(&id, self.config().notify_rooms_on_disconnect)
                .is_some()
            {
                info!(connection = %id, "Evicted unresponsive connection");
                report.evicted.push(id);
            }
        }

        report
    }

    /// Record a pong (or equivalent proof of life) from a connection.
    ///
    /// Returns `false` if the connection is not registered.
    pub fn mark_alive(&self, connection_id: &str) -> bool {
        match self.lock().connections.get_mut(connection_id) {
            Some(conn) => {
                conn.liveness = Liveness::Alive;
                true
            }
            None => false,
        }
    }

    /// Get the liveness state of a connection.
    #[must_use]
    pub fn liveness(&self, connection_id: &str) -> Option<Liveness> {
        self.lock()
            .connections
            .get(connection_id)
            .map(|conn| conn.liveness)
    }
}

/// Background task that runs [`Hub::heartbeat_sweep`] on a fixed interval.
///
/// Stopping (or dropping) the monitor cancels the timer; it never closes
/// connections itself.
pub struct HeartbeatMonitor {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl HeartbeatMonitor {
    /// Start a monitor. The first sweep happens one interval from now.
    #[must_use]
    pub fn spawn(hub: Arc<Hub>, interval: Duration) -> Self {
        Self::spawn_with(hub, interval, |_| {})
    }

    /// Start a monitor that hands every sweep report to `on_sweep`.
    #[must_use]
    pub fn spawn_with<F>(hub: Arc<Hub>, interval: Duration, on_sweep: F) -> Self
    where
        F: Fn(&SweepReport) + Send + 'static,
    {
        let interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        let (stop, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(interval_ms = interval.as_millis() as u64, "Heartbeat monitor started");

            loop {
                tokio::select! {
                    // Fires on stop() and when the monitor handle is dropped
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let report = hub.heartbeat_sweep();
                        trace!(
                            probed = report.probed,
                            evicted = report.evicted.len(),
                            "Heartbeat sweep"
                        );
                        on_sweep(&report);
                    }
                }
            }

            debug!("Heartbeat monitor stopped");
        });

        Self { stop, task }
    }

    /// Stop the monitor and wait for its task to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}
