//! # castgate-rpc
//!
//! Request/reply calls from the gateway to the application backend.
//!
//! - [`Backend`]: transport seam, with an HTTP implementation ([`HttpBackend`])
//! - [`CapacityController`]: fixed-size ticket pool bounding in-flight calls
//! - [`RpcClient`]: `invoke(request) -> reply` with a per-call timeout,
//!   failing fast with `CapacityExhausted` when no ticket frees up in time

#![deny(unsafe_code)]

pub mod backend;
pub mod capacity;
pub mod client;
pub mod errors;

pub use backend::{Backend, HttpBackend};
pub use capacity::{CapacityController, Ticket};
pub use client::RpcClient;
pub use errors::RpcClientError;
