//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// The single origin every request is forwarded to.
    pub target: TargetConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Socket and buffer tunables.
    pub connection: ConnectionConfig,

    /// Identification strings added to outgoing traffic.
    pub identity: IdentityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8888").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8888".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Origin server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Origin host name or address.
    pub host: String,

    /// Origin port.
    pub port: u16,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 80,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Socket idle timeout in seconds; an idle connection is shut down.
    pub socket_secs: u64,

    /// Origin connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time granted to open connections after shutdown is signalled.
    pub shutdown_grace_secs: u64,
}

impl TimeoutConfig {
    pub fn socket(&self) -> Duration {
        Duration::from_secs(self.socket_secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            socket_secs: 30,
            connect_secs: 10,
            shutdown_grace_secs: 5,
        }
    }
}

/// Socket and buffer tunables shared by both connection kinds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Per-connection session buffer size in bytes (read chunk and output limit).
    pub socket_buffer_size: usize,

    /// Capacity of each pair's body pipes in bytes.
    pub pipe_buffer_size: usize,

    /// Disable Nagle's algorithm on both sides.
    pub tcp_nodelay: bool,

    /// Largest accepted message head in bytes.
    pub max_head_size: usize,

    /// Ask the origin for `100 Continue` before sending request bodies.
    pub use_expect_continue: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            socket_buffer_size: 8 * 1024,
            pipe_buffer_size: 10 * 1024,
            tcp_nodelay: true,
            max_head_size: 8 * 1024,
            use_expect_continue: false,
        }
    }
}

/// Identification of the proxy in forwarded messages.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// `Server` value for responses that carry none after stripping.
    pub origin_server: Option<String>,

    /// `User-Agent` value for forwarded requests.
    pub user_agent: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        let ident = concat!("tandem-proxy/", env!("CARGO_PKG_VERSION")).to_string();
        Self {
            origin_server: Some(ident.clone()),
            user_agent: Some(ident),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "tandem_proxy=info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
