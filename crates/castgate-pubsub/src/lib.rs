//! # castgate-pubsub
//!
//! Topic-keyed fanout.
//!
//! - [`PubSubBus`]: stream → subscribers table with per-shard locking
//! - [`Subscriber`]: seam the gateway's connections implement
//! - [`relay`]: fire-and-forget relay of publishes between gateway nodes
//!   over newline-delimited JSON on TCP

#![deny(unsafe_code)]

pub mod bus;
pub mod relay;

pub use bus::{PubSubBus, Subscriber};
pub use relay::{PeerRelay, RelayError, RelayFrame, serve_relay};
