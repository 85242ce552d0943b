//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is accepting connections, `"draining"`
    /// during shutdown.
    pub status: String,
    /// Node identifier.
    pub node_id: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Authenticated connections.
    pub connections: usize,
    /// Streams with at least one local subscriber.
    pub streams: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    node_id: &str,
    draining: bool,
    connections: usize,
    streams: usize,
) -> HealthResponse {
    HealthResponse {
        status: if draining { "draining" } else { "ok" }.into(),
        node_id: node_id.to_owned(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        streams,
    }
}
