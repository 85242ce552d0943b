//! Backend-originated broadcast message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `(stream, payload, token)` submitted to the broadcast ingress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Target stream.
    pub stream: String,
    /// Opaque payload delivered as the frame's `message`.
    pub payload: Value,
    /// Shared-secret token.
    #[serde(default)]
    pub token: String,
}

impl std::fmt::Display for BroadcastMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the token.
        write!(f, "broadcast to {}", self.stream)
    }
}
