//! Multi-node relay.
//!
//! Every local publish is forwarded to each configured peer as one line of
//! JSON over a long-lived TCP link. Links open lazily and authenticate with
//! a `hello` frame carrying the shared secret. Delivery is fire-and-forget:
//! a frame that cannot be written is dropped and counted, never retried.
//! Frames received from peers are delivered locally only.

mod link;
mod listener;

pub use listener::serve_relay;

use std::sync::Arc;
use std::time::Duration;

use castgate_core::metrics::PUBSUB_RELAY_FAILURES_TOTAL;
use castgate_core::{GatewayError, NodeId};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Longest accepted relay line.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// One line on a relay link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// First frame on every link.
    Hello {
        /// Sending node.
        node_id: NodeId,
        /// Shared secret.
        token: String,
    },
    /// A publish made on the sending node.
    Publish {
        /// Node the publish originated on.
        origin: NodeId,
        /// Target stream.
        stream: String,
        /// Payload.
        payload: Value,
    },
}

/// Relay failures. All of them surface as `peer-unreachable`.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// TCP connect failed or timed out.
    #[error("connect to {peer} failed: {message}")]
    Connect {
        /// Peer address.
        peer: String,
        /// Description.
        message: String,
    },
    /// The link's outbound queue is full.
    #[error("queue for {peer} is full")]
    QueueFull {
        /// Peer address.
        peer: String,
    },
    /// The link task has stopped and no longer accepts frames.
    #[error("link to {peer} is closed")]
    LinkClosed {
        /// Peer address.
        peer: String,
    },
    /// Writing or reading a line failed.
    #[error("link to {peer} failed: {source}")]
    Link {
        /// Peer address.
        peer: String,
        /// Codec or I/O error.
        #[source]
        source: tokio_util::codec::LinesCodecError,
    },
}

impl RelayError {
    /// Metric label for the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::QueueFull { .. } => "queue_full",
            Self::LinkClosed { .. } => "link_closed",
            Self::Link { .. } => "link",
        }
    }

    fn from_try_send<T>(peer: &str, err: &TrySendError<T>) -> Self {
        let peer = peer.to_owned();
        match err {
            TrySendError::Full(_) => Self::QueueFull { peer },
            TrySendError::Closed(_) => Self::LinkClosed { peer },
        }
    }

    /// Peer address involved.
    pub fn peer(&self) -> &str {
        match self {
            Self::Connect { peer, .. }
            | Self::QueueFull { peer }
            | Self::LinkClosed { peer }
            | Self::Link { peer, .. } => peer,
        }
    }
}

impl From<RelayError> for GatewayError {
    fn from(err: RelayError) -> Self {
        GatewayError::PeerUnreachable {
            peer: err.peer().to_owned(),
            message: err.to_string(),
        }
    }
}

/// Log and count a dropped relay frame.
pub(crate) fn record_failure(err: RelayError) {
    let kind = err.kind();
    counter!(PUBSUB_RELAY_FAILURES_TOTAL, "peer" => err.peer().to_owned(), "kind" => kind)
        .increment(1);
    let err = GatewayError::from(err);
    warn!(code = err.code(), kind, error = %err, "relay frame dropped");
}

struct PeerHandle {
    addr: String,
    tx: mpsc::Sender<Arc<str>>,
}

/// Outbound side of the relay: one link task per peer.
pub struct PeerRelay {
    node_id: NodeId,
    peers: Vec<PeerHandle>,
}

impl PeerRelay {
    /// Spawn a link task per peer. Tasks stop when `cancel` fires.
    pub fn spawn(
        node_id: NodeId,
        secret: &str,
        peers: &[String],
        queue_size: usize,
        connect_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Self {
        let hello = RelayFrame::Hello {
            node_id: node_id.clone(),
            token: secret.to_owned(),
        };
        let hello: Arc<str> = serde_json::to_string(&hello).unwrap_or_default().into();

        let peers = peers
            .iter()
            .map(|addr| {
                let (tx, rx) = mpsc::channel(queue_size.max(1));
                let _ = tokio::spawn(link::run_link(
                    addr.clone(),
                    Arc::clone(&hello),
                    rx,
                    connect_timeout,
                    cancel.child_token(),
                ));
                PeerHandle {
                    addr: addr.clone(),
                    tx,
                }
            })
            .collect::<Vec<_>>();
        info!(node_id = %node_id, peers = peers.len(), "peer relay started");
        Self { node_id, peers }
    }

    /// Queue a publish for every peer without waiting.
    pub fn relay(&self, stream: &str, payload: &Value) {
        if self.peers.is_empty() {
            return;
        }
        let frame = RelayFrame::Publish {
            origin: self.node_id.clone(),
            stream: stream.to_owned(),
            payload: payload.clone(),
        };
        let line: Arc<str> = match serde_json::to_string(&frame) {
            Ok(line) => line.into(),
            Err(e) => {
                warn!(stream, error = %e, "failed to encode relay frame");
                return;
            }
        };
        for peer in &self.peers {
            if let Err(e) = peer.tx.try_send(Arc::clone(&line)) {
                record_failure(RelayError::from_try_send(&peer.addr, &e));
            }
        }
    }

    /// This node's ID.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Configured peer addresses.
    pub fn peer_addrs(&self) -> Vec<&str> {
        self.peers.iter().map(|p| p.addr.as_str()).collect()
    }
}
