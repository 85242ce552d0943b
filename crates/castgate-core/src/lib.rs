//! # castgate-core
//!
//! Foundation types shared by every castgate crate.
//!
//! - Branded ID newtypes ([`ConnectionId`], [`NodeId`])
//! - RPC envelope exchanged with the application backend ([`rpc`])
//! - Client wire frames ([`frames`])
//! - Subscriptions and broadcast messages
//! - Error taxonomy ([`GatewayError`])
//! - Shared-secret verification and `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod auth;
pub mod broadcast;
pub mod errors;
pub mod frames;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod rpc;
pub mod subscription;

pub use broadcast::BroadcastMessage;
pub use errors::{GatewayError, Result};
pub use ids::{ConnectionId, NodeId};
pub use subscription::Subscription;
