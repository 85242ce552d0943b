//! RPC client errors.

use castgate_core::GatewayError;

/// Why an RPC call produced no reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcClientError {
    /// No ticket became available within the wait budget.
    #[error("no rpc capacity after {waited_ms}ms")]
    CapacityExhausted {
        /// Wait budget that elapsed.
        waited_ms: u64,
    },

    /// The call exceeded its timeout.
    #[error("rpc timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// Connection refused, reset, or non-success HTTP status.
    #[error("rpc transport failed: {message}")]
    Transport {
        /// Description.
        message: String,
    },

    /// The backend answered with something that is not a reply.
    #[error("invalid rpc reply: {message}")]
    InvalidReply {
        /// Description.
        message: String,
    },
}

impl RpcClientError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CapacityExhausted { .. } => "capacity_exhausted",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::InvalidReply { .. } => "invalid_reply",
        }
    }
}

impl From<RpcClientError> for GatewayError {
    fn from(err: RpcClientError) -> Self {
        match err {
            RpcClientError::CapacityExhausted { waited_ms } => {
                GatewayError::CapacityExhausted { waited_ms }
            }
            other => GatewayError::RpcUnavailable {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn capacity_maps_to_capacity_exhausted() {
        let err: GatewayError = RpcClientError::CapacityExhausted { waited_ms: 10 }.into();
        assert_matches!(err, GatewayError::CapacityExhausted { waited_ms: 10 });
    }

    #[test]
    fn everything_else_maps_to_unavailable() {
        for err in [
            RpcClientError::Timeout { timeout_ms: 1 },
            RpcClientError::Transport {
                message: "refused".into(),
            },
            RpcClientError::InvalidReply {
                message: "eof".into(),
            },
        ] {
            let mapped: GatewayError = err.into();
            assert_matches!(mapped, GatewayError::RpcUnavailable { .. });
        }
    }

    #[test]
    fn kinds() {
        assert_eq!(RpcClientError::Timeout { timeout_ms: 1 }.kind(), "timeout");
        assert_eq!(
            RpcClientError::CapacityExhausted { waited_ms: 1 }.kind(),
            "capacity_exhausted"
        );
    }
}
