//! `WebSocket` transport: connection state, heartbeat, and the per-client
//! session loop.

pub mod connection;
pub mod heartbeat;
pub mod session;
pub mod state;
