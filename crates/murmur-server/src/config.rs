//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (MURMUR_HOST, MURMUR_PORT)
//! - TOML configuration file

use anyhow::{Context, Result};
use murmur_core::{AgentConfig, HubConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

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

    /// Join authorization.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path prefix of the join endpoint; the room id follows it.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Header carrying the identity verified by the upstream auth layer.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outbound queue capacity per connection.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Capacity of each hub event queue.
    #[serde(default = "default_hub_queue_capacity")]
    pub hub_queue_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Time allowed between pongs in milliseconds. Pings go out at nine
    /// tenths of it.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,

    /// Time allowed for a single write in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Who may join which room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPolicy {
    /// Anyone may join any room.
    Open,
    /// Only the two identities a room id is derived from may join it.
    #[default]
    Paired,
    /// Only participants of a session opened through `POST /sessions`.
    Registered,
}

/// Session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Authorization policy.
    #[serde(default)]
    pub policy: SessionPolicy,
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
    std::env::var("MURMUR_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("MURMUR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws/chat".to_string()
}

fn default_identity_header() -> String {
    "x-user-id".to_string()
}

fn default_max_message_size() -> usize {
    murmur_protocol::MAX_MESSAGE_SIZE
}

fn default_outbound_queue_capacity() -> usize {
    murmur_core::agent::DEFAULT_QUEUE_CAPACITY
}

fn default_hub_queue_capacity() -> usize {
    murmur_core::hub::DEFAULT_QUEUE_CAPACITY
}

fn default_heartbeat_timeout() -> u64 {
    60_000
}

fn default_write_timeout() -> u64 {
    10_000
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
            sessions: SessionsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            identity_header: default_identity_header(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            hub_queue_capacity: default_hub_queue_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_heartbeat_timeout(),
            write_timeout_ms: default_write_timeout(),
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
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "murmur.toml",
            "/etc/murmur/murmur.toml",
            "~/.config/murmur/murmur.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
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

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))
    }

    /// Get the metrics listener address.
    ///
    /// # Errors
    ///
    /// Returns an error if host and metrics port do not form a socket address.
    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.metrics.port);
        addr.parse().with_context(|| format!("Invalid metrics address: {addr}"))
    }

    /// Build the per-connection agent configuration.
    #[must_use]
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig::default()
            .with_read_timeout(Duration::from_millis(self.heartbeat.timeout_ms))
            .with_write_timeout(Duration::from_millis(self.heartbeat.write_timeout_ms))
            .with_max_message_size(self.limits.max_message_size)
            .with_queue_capacity(self.limits.outbound_queue_capacity)
    }

    /// Build the hub configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.limits.hub_queue_capacity,
        }
    }

    /// Join route, e.g. `/ws/chat/:room_id`.
    #[must_use]
    pub fn join_route(&self) -> String {
        format!(
            "{}/:room_id",
            self.transport.websocket_path.trim_end_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws/chat");
        assert_eq!(config.transport.identity_header, "x-user-id");
        assert_eq!(config.limits.max_message_size, 512);
        assert_eq!(config.limits.outbound_queue_capacity, 256);
        assert_eq!(config.sessions.policy, SessionPolicy::Paired);
    }

    #[test]
    fn test_config_bind_addr() {
        let config: Config = toml::from_str("host = \"127.0.0.1\"\nport = 8080").unwrap();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad: Config = toml::from_str("host = \"not a host\"").unwrap();
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [transport]
            websocket_path = "/chat/"

            [limits]
            outbound_queue_capacity = 64

            [heartbeat]
            timeout_ms = 10000

            [sessions]
            policy = "registered"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.outbound_queue_capacity, 64);
        assert_eq!(config.limits.max_message_size, 512);
        assert_eq!(config.sessions.policy, SessionPolicy::Registered);
        assert_eq!(config.join_route(), "/chat/:room_id");
    }

    #[test]
    fn test_agent_config_from_heartbeat() {
        let config: Config = toml::from_str("[heartbeat]\ntimeout_ms = 10000").unwrap();
        let agent = config.agent_config();
        assert_eq!(agent.read_timeout, Duration::from_secs(10));
        assert_eq!(agent.ping_interval, Duration::from_secs(9));
        assert_eq!(agent.write_timeout, Duration::from_secs(10));
        assert_eq!(config.hub_config().queue_capacity, 1024);
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        assert!(toml::from_str::<Config>("[sessions]\npolicy = \"everyone\"").is_err());
    }
}
