//! Broadcast ingress and multi-node relay settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Broadcast ingress.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastSettings {
    /// Shared secret the backend presents as `token`. Also authenticates
    /// relay links between nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// HTTP path of the ingress endpoint.
    pub path: String,
}

impl BroadcastSettings {
    /// Default ingress path.
    pub const DEFAULT_PATH: &'static str = "/_broadcast";
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            secret: None,
            path: Self::DEFAULT_PATH.to_string(),
        }
    }
}

/// Multi-node relay. Single-node when both `listen` and `peers` are empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSettings {
    /// This node's name in relay frames; generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Address the relay listener binds to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    /// Peer relay addresses (`host:port`).
    pub peers: Vec<String>,
    /// Frames buffered per peer link before new publishes are dropped.
    pub peer_queue_size: usize,
    /// Connect timeout for peer links, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl ClusterSettings {
    /// Whether this node relays to or accepts relay traffic from peers.
    pub fn is_clustered(&self) -> bool {
        self.listen.is_some() || !self.peers.is_empty()
    }

    /// Peer connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            node_id: None,
            listen: None,
            peers: Vec::new(),
            peer_queue_size: 1024,
            connect_timeout_ms: 1_000,
        }
    }
}
