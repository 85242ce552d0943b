//! Backend RPC settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the gateway reaches the application backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcSettings {
    /// Backend RPC endpoint.
    pub url: String,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum concurrent in-flight calls. Should track the backend's
    /// worker pool size.
    pub concurrency: usize,
    /// How long a call may wait for a free ticket, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl RpcSettings {
    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Ticket wait budget.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3000/_castgate/rpc".to_string(),
            timeout_ms: 3_000,
            concurrency: 28,
            acquire_timeout_ms: 500,
        }
    }
}
