//! # Matchcast Server
//!
//! Realtime connection and broadcast server for live match events.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! matchcast
//!
//! # Run with a specific config file
//! MATCHCAST_CONFIG=/path/to/matchcast.toml matchcast
//!
//! # Override single settings from the environment
//! MATCHCAST_PORT=8080 MATCHCAST__HEARTBEAT__INTERVAL_MS=10000 matchcast
//! ```
//!
//! Event producers push to connected clients with
//! `POST /broadcast {"event": "...", "data": ..., "channel": "..."}`.

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used when `RUST_LOG` is unset. Covers every `matchcast*` target.
const DEFAULT_LOG_FILTER: &str = "matchcast=debug";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Matchcast server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    #[test]
    fn test_default_log_filter() {
        let filter = EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
        assert_eq!(filter.to_string(), "matchcast=debug");
    }
}
