//! # castgate-server
//!
//! Axum HTTP + `WebSocket` gateway.
//!
//! - `WebSocket` endpoint: per-connection lifecycle
//!   (`Connecting → Authenticated → Active → Closing → Closed`), serialized
//!   action processing, bounded outbound buffers, heartbeat
//! - Broadcast ingress: token-checked `POST`, published onto the bus
//! - Connection registry and subscription bookkeeping
//! - `/health` and Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod broadcast;
pub mod errors;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod subscriptions;
pub mod websocket;
