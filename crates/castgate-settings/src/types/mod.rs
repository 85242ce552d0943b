//! Settings types, one section per concern.

mod cluster;
mod rpc;
mod server;

pub use cluster::{BroadcastSettings, ClusterSettings};
pub use rpc::RpcSettings;
pub use server::ServerSettings;

use castgate_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Client listener.
    pub server: ServerSettings,
    /// Backend RPC.
    pub rpc: RpcSettings,
    /// Broadcast ingress.
    pub broadcast: BroadcastSettings,
    /// Multi-node relay.
    pub cluster: ClusterSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

/// Logging output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl GatewaySettings {
    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rpc.concurrency == 0 {
            return Err(invalid("rpc.concurrency must be at least 1"));
        }
        if self.rpc.timeout_ms == 0 {
            return Err(invalid("rpc.timeoutMs must be at least 1"));
        }
        if self.rpc.url.is_empty() {
            return Err(invalid("rpc.url is required"));
        }
        if self.server.outbound_buffer_size == 0 {
            return Err(invalid("server.outboundBufferSize must be at least 1"));
        }
        if self.server.action_queue_size == 0 {
            return Err(invalid("server.actionQueueSize must be at least 1"));
        }
        if self.server.ping_interval_secs == 0 {
            return Err(invalid("server.pingIntervalSecs must be at least 1"));
        }
        if !self.server.path.starts_with('/') {
            return Err(invalid("server.path must start with '/'"));
        }
        if !self.broadcast.path.starts_with('/') {
            return Err(invalid("broadcast.path must start with '/'"));
        }
        if self.broadcast.path == self.server.path {
            return Err(invalid("broadcast.path must differ from server.path"));
        }
        if self.broadcast.secret.as_deref().is_none_or(str::is_empty) {
            return Err(invalid("broadcast.secret is required"));
        }
        if self.cluster.peer_queue_size == 0 {
            return Err(invalid("cluster.peerQueueSize must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> SettingsError {
    SettingsError::InvalidValue(message.to_string())
}
