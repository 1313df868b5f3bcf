//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults (`MATCHCAST_HOST` / `MATCHCAST_PORT` feed these)
//! - The first TOML file found: `$MATCHCAST_CONFIG`, `matchcast.toml`,
//!   `/etc/matchcast/matchcast.toml`, `~/.config/matchcast/matchcast.toml`
//! - Environment variables (`MATCHCAST__LIMITS__MAX_CONNECTIONS=5000`)

use anyhow::{Context, Result};
use config::Environment;
use matchcast_core::HubConfig;
use matchcast_transport::DEFAULT_SEND_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file locations, in search order.
const CONFIG_PATHS: [&str; 3] = [
    "matchcast.toml",
    "/etc/matchcast/matchcast.toml",
    "~/.config/matchcast/matchcast.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Room relay configuration.
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Outbound frames buffered per connection; further frames to a slow
    /// client are dropped.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum number of channels.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Maximum subscriptions per connection.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,

    /// Maximum number of rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum rooms a connection can be a member of.
    #[serde(default = "default_max_rooms_per_connection")]
    pub max_rooms_per_connection: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds. A silent connection is evicted
    /// within two intervals.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Room relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Tell remaining room members when a connection drops without leaving.
    #[serde(default)]
    pub notify_on_disconnect: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("MATCHCAST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("MATCHCAST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_send_queue_capacity() -> usize {
    DEFAULT_SEND_QUEUE_CAPACITY
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_channels() -> usize {
    10_000
}

fn default_max_subscriptions() -> usize {
    100
}

fn default_max_rooms() -> usize {
    10_000
}

fn default_max_rooms_per_connection() -> usize {
    100
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            rooms: RoomsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_channels: default_max_channels(),
            max_subscriptions_per_connection: default_max_subscriptions(),
            max_rooms: default_max_rooms(),
            max_rooms_per_connection: default_max_rooms_per_connection(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, the first config file found, and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        Self::layered(Self::find_file().as_deref(), Self::environment())
    }

    /// Load configuration from a specific file, without environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn find_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("MATCHCAST_CONFIG") {
            return Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }

        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    fn environment() -> Environment {
        Environment::with_prefix("MATCHCAST")
            .separator("__")
            .ignore_empty(true)
            .try_parsing(true)
    }

    fn layered(file: Option<&Path>, env: Environment) -> Result<Self> {
        let base = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&base).context("Failed to encode configuration")?)
            .add_source(env)
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))
    }

    /// Get the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }

    /// Build the hub configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_channels: self.limits.max_channels,
            max_subscriptions_per_connection: self.limits.max_subscriptions_per_connection,
            max_rooms: self.limits.max_rooms,
            max_rooms_per_connection: self.limits.max_rooms_per_connection,
            max_message_size: self.limits.max_message_size,
            notify_rooms_on_disconnect: self.rooms.notify_on_disconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_from(vars: &[(&str, &str)]) -> Environment {
        let source = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::environment().source(Some(source))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.heartbeat.interval_ms, 30_000);
        assert!(!config.rooms.notify_on_disconnect);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let bad = Config {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_connections = 50000

            [rooms]
            notify_on_disconnect = true
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.limits.max_channels, 10_000);
        assert!(config.rooms.notify_on_disconnect);
    }

    #[test]
    fn test_environment_overrides() {
        let env = env_from(&[
            ("MATCHCAST__PORT", "9100"),
            ("MATCHCAST__LIMITS__MAX_CONNECTIONS", "5"),
            ("MATCHCAST__HEARTBEAT__INTERVAL_MS", "1000"),
            ("MATCHCAST__ROOMS__NOTIFY_ON_DISCONNECT", "true"),
            ("MATCHCAST__TRANSPORT__SEND_QUEUE_CAPACITY", "16"),
            ("MATCHCAST__LIMITS__MAX_ROOMS", "20"),
        ]);

        let config = Config::layered(None, env).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.limits.max_connections, 5);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert!(config.rooms.notify_on_disconnect);
        assert_eq!(config.transport.send_queue_capacity, 16);
        assert_eq!(config.limits.max_rooms, 20);
        assert_eq!(config.transport.websocket_path, "/ws");
    }

    #[test]
    fn test_environment_overrides_file() {
        let path = std::env::temp_dir().join(format!("matchcast-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 7000\n[heartbeat]\ninterval_ms = 250\n").unwrap();

        let env = env_from(&[("MATCHCAST__PORT", "7001")]);
        let config = Config::layered(Some(&path), env).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 7001);
        assert_eq!(config.heartbeat.interval_ms, 250);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::from_file("/nonexistent/matchcast.toml").is_err());
    }

    #[test]
    fn test_hub_config_mapping() {
        let mut config = Config::default();
        config.limits.max_channels = 7;
        config.limits.max_message_size = 512;
        config.limits.max_rooms_per_connection = 3;
        config.rooms.notify_on_disconnect = true;

        let hub = config.hub_config();
        assert_eq!(hub.max_channels, 7);
        assert_eq!(hub.max_rooms, 10_000);
        assert_eq!(hub.max_rooms_per_connection, 3);
        assert_eq!(hub.max_subscriptions_per_connection, 100);
        assert_eq!(hub.max_message_size, 512);
        assert!(hub.notify_rooms_on_disconnect);
    }
}
