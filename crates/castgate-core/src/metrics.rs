//! Metric name constants shared across crates.

/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connections accepted total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Connections closed because their outbound buffer overflowed (counter).
pub const WS_OUTBOUND_OVERFLOW_TOTAL: &str = "ws_outbound_overflow_total";
/// RPC requests total (counter, labels: type).
pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total";
/// RPC errors total (counter, labels: type, kind).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";
/// RPC request duration seconds (histogram, labels: type).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "rpc_request_duration_seconds";
/// RPC calls refused because no ticket was available (counter).
pub const RPC_CAPACITY_EXHAUSTED_TOTAL: &str = "rpc_capacity_exhausted_total";
/// RPC calls currently holding a ticket (gauge).
pub const RPC_IN_FLIGHT: &str = "rpc_in_flight";
/// Messages handed to local subscribers (counter).
pub const PUBSUB_FANOUT_TOTAL: &str = "pubsub_fanout_total";
/// Publishes received (counter, labels: origin).
pub const PUBSUB_PUBLISH_TOTAL: &str = "pubsub_publish_total";
/// Relay frames dropped because a peer was unreachable (counter, labels: peer).
pub const PUBSUB_RELAY_FAILURES_TOTAL: &str = "pubsub_relay_failures_total";
/// Broadcast ingress requests (counter, labels: outcome).
pub const BROADCAST_REQUESTS_TOTAL: &str = "broadcast_requests_total";

/// Every metric name, for exposition checks.
pub const ALL: &[&str] = &[
    WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
    WS_CONNECTION_DURATION_SECONDS,
    WS_OUTBOUND_OVERFLOW_TOTAL,
    RPC_REQUESTS_TOTAL,
    RPC_ERRORS_TOTAL,
    RPC_REQUEST_DURATION_SECONDS,
    RPC_CAPACITY_EXHAUSTED_TOTAL,
    RPC_IN_FLIGHT,
    PUBSUB_FANOUT_TOTAL,
    PUBSUB_PUBLISH_TOTAL,
    PUBSUB_RELAY_FAILURES_TOTAL,
    BROADCAST_REQUESTS_TOTAL,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_constants_are_snake_case() {
        for name in ALL {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }

    #[test]
    fn metric_constants_are_unique() {
        let mut names: Vec<_> = ALL.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL.len());
    }
}
