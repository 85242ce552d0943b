//! Gateway error taxonomy.

// ── Error code constants ────────────────────────────────────────────

/// Backend explicitly denied the request.
pub const AUTH_REJECTED: &str = "AUTH_REJECTED";
/// Backend timed out or the transport failed.
pub const RPC_UNAVAILABLE: &str = "RPC_UNAVAILABLE";
/// No RPC ticket available within the wait budget.
pub const CAPACITY_EXHAUSTED: &str = "CAPACITY_EXHAUSTED";
/// Broadcast token did not match the shared secret.
pub const BROADCAST_UNAUTHENTICATED: &str = "BROADCAST_UNAUTHENTICATED";
/// Multi-node relay could not reach a peer.
pub const PEER_UNREACHABLE: &str = "PEER_UNREACHABLE";
/// Malformed client frame or broadcast body.
pub const INVALID_FRAME: &str = "INVALID_FRAME";
/// Unexpected internal fault.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Errors surfaced by gateway operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Backend denied the connection or command. Terminal for a connect.
    #[error("rejected by backend: {message}")]
    AuthRejected {
        /// Backend-supplied reason.
        message: String,
    },

    /// Backend unreachable, slow, or replied with garbage.
    #[error("rpc unavailable: {message}")]
    RpcUnavailable {
        /// Description.
        message: String,
    },

    /// The RPC ticket pool stayed full for the whole wait budget.
    #[error("rpc capacity exhausted after waiting {waited_ms}ms")]
    CapacityExhausted {
        /// Wait budget that elapsed.
        waited_ms: u64,
    },

    /// Broadcast token mismatch.
    #[error("broadcast token rejected")]
    BroadcastUnauthenticated,

    /// Relay to a peer node failed.
    #[error("peer {peer} unreachable: {message}")]
    PeerUnreachable {
        /// Peer address.
        peer: String,
        /// Description.
        message: String,
    },

    /// Malformed input.
    #[error("{message}")]
    InvalidFrame {
        /// Description.
        message: String,
    },

    /// Internal fault.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl GatewayError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRejected { .. } => AUTH_REJECTED,
            Self::RpcUnavailable { .. } => RPC_UNAVAILABLE,
            Self::CapacityExhausted { .. } => CAPACITY_EXHAUSTED,
            Self::BroadcastUnauthenticated => BROADCAST_UNAUTHENTICATED,
            Self::PeerUnreachable { .. } => PEER_UNREACHABLE,
            Self::InvalidFrame { .. } => INVALID_FRAME,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Whether the error came from the RPC path and the backend's intent is
    /// unknown. Both variants are handled as safety-first rejections.
    pub fn is_rpc_failure(&self) -> bool {
        matches!(
            self,
            Self::RpcUnavailable { .. } | Self::CapacityExhausted { .. }
        )
    }

    /// JSON error body `{code, message}`.
    pub fn to_error_body(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            GatewayError::AuthRejected { message: String::new() }.code(),
            "AUTH_REJECTED"
        );
        assert_eq!(
            GatewayError::CapacityExhausted { waited_ms: 5 }.code(),
            "CAPACITY_EXHAUSTED"
        );
        assert_eq!(
            GatewayError::BroadcastUnauthenticated.code(),
            "BROADCAST_UNAUTHENTICATED"
        );
        assert_eq!(
            GatewayError::PeerUnreachable {
                peer: "a".into(),
                message: "b".into()
            }
            .code(),
            "PEER_UNREACHABLE"
        );
    }

    #[test]
    fn rpc_failures_classified() {
        assert!(GatewayError::CapacityExhausted { waited_ms: 1 }.is_rpc_failure());
        assert!(
            GatewayError::RpcUnavailable {
                message: "timeout".into()
            }
            .is_rpc_failure()
        );
        assert!(
            !GatewayError::AuthRejected {
                message: "no".into()
            }
            .is_rpc_failure()
        );
    }

    #[test]
    fn display_includes_context() {
        let err = GatewayError::CapacityExhausted { waited_ms: 250 };
        assert_eq!(err.to_string(), "rpc capacity exhausted after waiting 250ms");
        let err = GatewayError::PeerUnreachable {
            peer: "10.0.0.2:7000".into(),
            message: "connection refused".into(),
        };
        assert!(err.to_string().contains("10.0.0.2:7000"));
    }

    #[test]
    fn error_body_shape() {
        let body = GatewayError::BroadcastUnauthenticated.to_error_body();
        assert_eq!(body["code"], "BROADCAST_UNAUTHENTICATED");
        assert_eq!(body["message"], "broadcast token rejected");
    }
}
