//! Connection handlers for Matchcast server.
//!
//! This module wires the hub to HTTP: the WebSocket endpoint, the broadcast
//! ingress used by event producers, and the health check.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, MessageMetrics};
use anyhow::Result;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use matchcast_core::{HeartbeatMonitor, Hub, HubError};
use matchcast_transport::{run_session, SessionConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The connection hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
    /// Admitted WebSocket sessions, counted from before the upgrade.
    admitted: Arc<AtomicUsize>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            hub: Arc::new(Hub::with_config(config.hub_config())),
            config,
            admitted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reserve a connection slot, or `None` at the connection limit.
    fn try_admit(&self) -> Option<ConnectionSlot> {
        let limit = self.config.limits.max_connections;
        self.admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        Some(ConnectionSlot {
            admitted: self.admitted.clone(),
        })
    }
}

/// A reserved connection slot, released on drop.
struct ConnectionSlot {
    admitted: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.admitted.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Body of a broadcast request.
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    /// Event type.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// Target channel; every connection when absent.
    #[serde(default)]
    pub channel: Option<String>,
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/broadcast", post(broadcast_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let stats_hub = state.hub.clone();
    let monitor = HeartbeatMonitor::spawn_with(
        state.hub.clone(),
        config.heartbeat_interval(),
        move |report| {
            metrics::record_sweep(report);
            metrics::set_hub_stats(&stats_hub.stats());
        },
    );

    let app = router(state.clone());

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Matchcast server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let hub = state.hub.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            monitor.stop().await;
            let closed = hub.shutdown();
            info!(connections = closed, "Closed all connections");
        })
        .await?;

    info!("Matchcast server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "stats": state.hub.stats(),
    }))
}

/// Broadcast ingress for event producers.
async fn broadcast_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BroadcastRequest>,
) -> Response {
    if request.event.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Event cannot be empty");
    }

    let start = Instant::now();
    let channel = request.channel.as_deref();
    match state.hub.broadcast(&request.event, request.data, channel) {
        Ok(report) => {
            let scope = if channel.is_some() { "channel" } else { "global" };
            metrics::record_broadcast(&report, scope, start.elapsed().as_secs_f64());
            Json(report).into_response()
        }
        Err(e @ HubError::InvalidChannel(_)) => {
            warn!(error = %e, "Rejected broadcast");
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
        Err(e) => {
            error!(error = %e, "Broadcast failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = state.try_admit() else {
        let limit = state.config.limits.max_connections;
        warn!(limit, "Connection limit reached, refusing upgrade");
        metrics::record_refused();
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached");
    };

    // A failed upgrade drops the callback and with it the slot
    ws.on_upgrade(move |socket| handle_websocket(socket, state, slot))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: ConnectionSlot) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (sink, stream) = socket.split();
    let session = SessionConfig {
        heartbeat_interval_ms: state.config.heartbeat.interval_ms,
        send_queue_capacity: state.config.transport.send_queue_capacity,
    };

    let summary = run_session(
        state.hub.clone(),
        sink,
        stream,
        session,
        Arc::new(MessageMetrics),
    )
    .await;

    debug!(
        connection = %summary.connection_id,
        handled = summary.handled,
        errors = summary.errors,
        reason = ?summary.reason,
        "Session finished"
    );
}
