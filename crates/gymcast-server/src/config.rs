//! Server configuration.

use std::time::Duration;

use gymcast_settings::GymcastSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the gymcast server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Allowed cross-origin client origin.
    pub frontend_url: String,
    /// Environment label reported by health checks.
    pub environment: String,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Heartbeat ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a connection after this long without a pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Shutdown grace period in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat pong timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            frontend_url: "http://localhost:3000".into(),
            environment: "development".into(),
            send_queue_capacity: 256,
            max_connections: 10_000,
            heartbeat_interval_ms: 25_000,
            heartbeat_timeout_ms: 60_000,
            shutdown_grace_ms: 10_000,
            max_message_size: 64 * 1024,
        }
    }
}

impl From<&GymcastSettings> for ServerConfig {
    fn from(settings: &GymcastSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            frontend_url: settings.server.frontend_url.clone(),
            environment: settings.server.environment.clone(),
            send_queue_capacity: settings.realtime.send_queue_capacity,
            max_connections: settings.realtime.max_connections,
            heartbeat_interval_ms: settings.realtime.heartbeat_interval_ms,
            heartbeat_timeout_ms: settings.realtime.heartbeat_timeout_ms,
            shutdown_grace_ms: settings.realtime.shutdown_grace_ms,
            max_message_size: settings.realtime.max_message_size,
        }
    }
}
