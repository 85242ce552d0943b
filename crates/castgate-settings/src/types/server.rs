//! Listener and per-connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client-facing listener and connection limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// WebSocket upgrade path.
    pub path: String,
    /// Per-connection outbound frame buffer. Overflow closes the connection.
    pub outbound_buffer_size: usize,
    /// Per-connection inbound action queue.
    pub action_queue_size: usize,
    /// Seconds between ping frames.
    pub ping_interval_secs: u64,
    /// Seconds without a pong before the connection is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Request headers forwarded to the backend on `connect`.
    pub forward_headers: Vec<String>,
    /// Seconds to wait for sessions to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl ServerSettings {
    /// `host:port` string for binding.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Ping interval as a [`Duration`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Heartbeat timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            path: "/cable".to_string(),
            outbound_buffer_size: 256,
            action_queue_size: 64,
            ping_interval_secs: 3,
            heartbeat_timeout_secs: 60,
            max_message_size: 64 * 1024,
            forward_headers: vec![
                "cookie".to_string(),
                "origin".to_string(),
                "authorization".to_string(),
            ],
            shutdown_timeout_secs: 10,
        }
    }
}
