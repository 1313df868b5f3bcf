//! Metrics collection and export for Matchcast.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use matchcast_core::{BroadcastReport, DispatchOutcome, HubStats, SweepReport};
use matchcast_transport::SessionObserver;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "matchcast_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "matchcast_connections_active";
    pub const CONNECTIONS_REFUSED: &str = "matchcast_connections_refused_total";
    pub const MESSAGES_TOTAL: &str = "matchcast_messages_total";
    pub const MESSAGES_BYTES: &str = "matchcast_messages_bytes";
    pub const PROTOCOL_ERRORS_TOTAL: &str = "matchcast_protocol_errors_total";
    pub const BROADCASTS_TOTAL: &str = "matchcast_broadcasts_total";
    pub const DELIVERIES_TOTAL: &str = "matchcast_deliveries_total";
    pub const EVICTIONS_TOTAL: &str = "matchcast_heartbeat_evictions_total";
    pub const CHANNELS_ACTIVE: &str = "matchcast_channels_active";
    pub const ROOMS_ACTIVE: &str = "matchcast_rooms_active";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "matchcast_subscriptions_active";
    pub const BROADCAST_LATENCY_SECONDS: &str = "matchcast_broadcast_latency_seconds";
    pub const DISPATCH_LATENCY_SECONDS: &str = "matchcast_dispatch_latency_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REFUSED,
        "Connections refused at the connection limit"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages processed");
    metrics::describe_counter!(
        names::PROTOCOL_ERRORS_TOTAL,
        "Inbound messages that were malformed, unrecognized or rejected"
    );
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Total number of broadcasts");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Per-recipient broadcast outcomes"
    );
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Connections evicted by the heartbeat monitor"
    );
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of active channels");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of active rooms");
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of channel subscriptions"
    );
    metrics::describe_histogram!(
        names::BROADCAST_LATENCY_SECONDS,
        "Broadcast fan-out latency in seconds"
    );
    metrics::describe_histogram!(
        names::DISPATCH_LATENCY_SECONDS,
        "Inbound message dispatch latency in seconds"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a connection refused at the limit.
pub fn record_refused() {
    counter!(names::CONNECTIONS_REFUSED).increment(1);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record the outcome of dispatching an inbound message.
pub fn record_dispatch(outcome: &DispatchOutcome) {
    let kind = match outcome {
        DispatchOutcome::Handled => return,
        DispatchOutcome::Malformed(_) => "malformed",
        DispatchOutcome::Unrecognized(_) => "unrecognized",
        DispatchOutcome::Rejected(_) => "rejected",
    };
    counter!(names::PROTOCOL_ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Record how long dispatching one inbound message took.
pub fn record_dispatch_latency(elapsed: Duration) {
    histogram!(names::DISPATCH_LATENCY_SECONDS).record(elapsed.as_secs_f64());
}

/// Record a broadcast and its per-recipient outcomes.
pub fn record_broadcast(report: &BroadcastReport, scope: &'static str, seconds: f64) {
    counter!(names::BROADCASTS_TOTAL, "scope" => scope).increment(1);
    counter!(names::DELIVERIES_TOTAL, "outcome" => "delivered").increment(report.delivered as u64);
    counter!(names::DELIVERIES_TOTAL, "outcome" => "skipped").increment(report.skipped as u64);
    counter!(names::DELIVERIES_TOTAL, "outcome" => "failed").increment(report.failed as u64);
    histogram!(names::BROADCAST_LATENCY_SECONDS).record(seconds);
}

/// Record a heartbeat sweep.
pub fn record_sweep(report: &SweepReport) {
    counter!(names::EVICTIONS_TOTAL).increment(report.evicted.len() as u64);
}

/// Update the hub gauges.
pub fn set_hub_stats(stats: &HubStats) {
    gauge!(names::CHANNELS_ACTIVE).set(stats.channels as f64);
    gauge!(names::ROOMS_ACTIVE).set(stats.rooms as f64);
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(stats.subscriptions as f64);
}

/// Session observer that records message traffic.
pub struct MessageMetrics;

impl SessionObserver for MessageMetrics {
    fn inbound(&self, bytes: usize, outcome: &DispatchOutcome, elapsed: Duration) {
        record_message(bytes, "inbound");
        record_dispatch(outcome);
        record_dispatch_latency(elapsed);
    }

    fn outbound(&self, bytes: usize) {
        record_message(bytes, "outbound");
    }
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
