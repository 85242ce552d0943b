//! `WebSocket` client connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use castgate_core::ConnectionId;
use castgate_core::frames::{DisconnectReason, ServerFrame};
use castgate_core::metrics::WS_OUTBOUND_OVERFLOW_TOTAL;
use castgate_pubsub::Subscriber;
use metrics::counter;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;

use super::state::ConnectionState;
use crate::subscriptions::SubscriptionSet;

/// Why a connection is being torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Client closed the socket.
    ClientClosed,
    /// Socket read or write failed.
    TransportError,
    /// Missed heartbeats.
    HeartbeatTimeout,
    /// Outbound buffer overflowed.
    Overflow,
    /// Backend replied with `stop`.
    Stopped,
    /// Gateway shutting down.
    Shutdown,
    /// Backend refused the handshake.
    Rejected,
}

impl CloseReason {
    /// Label used in logs, metrics, and the `disconnect` RPC.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Overflow => "overflow",
            Self::Stopped => "remote",
            Self::Shutdown => "server_restart",
            Self::Rejected => "rejected",
        }
    }

    /// Disconnect frame to attempt before closing, if the client should
    /// be told.
    pub fn notice(self) -> Option<DisconnectReason> {
        match self {
            // Rejections carry their own notice.
            Self::ClientClosed | Self::TransportError | Self::Rejected => None,
            Self::HeartbeatTimeout | Self::Overflow => Some(DisconnectReason::Faulted),
            Self::Stopped => Some(DisconnectReason::Remote),
            Self::Shutdown => Some(DisconnectReason::ServerRestart),
        }
    }
}

/// One connected client.
///
/// Lock order: `subscriptions` before `state`.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the client's `WebSocket` write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Backend identity token, set once on a successful `connect`.
    identifiers: OnceLock<String>,
    state: Mutex<ConnectionState>,
    subscriptions: Mutex<SubscriptionSet>,
    close_reason: OnceLock<CloseReason>,
    cancel: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat tick.
    pub is_alive: AtomicBool,
    /// When the last pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to a full or closed channel.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection in `Connecting`.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            identifiers: OnceLock::new(),
            state: Mutex::new(ConnectionState::Connecting),
            subscriptions: Mutex::new(SubscriptionSet::new()),
            close_reason: OnceLock::new(),
            cancel: CancellationToken::new(),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Queue a text frame for the client.
    ///
    /// Never blocks. A full buffer faults the connection: it is cancelled
    /// with [`CloseReason::Overflow`] rather than left lagging. Once a close
    /// reason is recorded, a full buffer only drops the frame.
    pub fn send(&self, message: Arc<String>) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                if self.close_reason.get().is_none() {
                    counter!(WS_OUTBOUND_OVERFLOW_TOTAL).increment(1);
                    warn!(conn_id = %self.id, "outbound buffer full, closing slow client");
                    self.cancel_with(CloseReason::Overflow);
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Serialize and queue a server frame.
    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        self.send(Arc::new(frame.to_json()))
    }

    /// Queue a backend transmission. Strings are written verbatim, other
    /// values are serialized.
    pub fn send_transmission(&self, transmission: &Value) -> bool {
        match transmission {
            Value::String(raw) => self.send(Arc::new(raw.clone())),
            other => match serde_json::to_string(other) {
                Ok(json) => self.send(Arc::new(json)),
                Err(_) => false,
            },
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    // ── Identity and state ──────────────────────────────────────────

    /// Record the backend identity. Later calls are ignored.
    pub fn set_identifiers(&self, identifiers: String) {
        let _ = self.identifiers.set(identifiers);
    }

    /// Backend identity, if authenticated.
    pub fn identifiers(&self) -> Option<String> {
        self.identifiers.get().cloned()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `next` if the transition is legal.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }

    /// Enter `Closing`. Returns `false` if teardown already started.
    pub fn begin_closing(&self) -> bool {
        self.transition(ConnectionState::Closing)
    }

    /// Enter `Closed`.
    pub fn mark_closed(&self) {
        let _ = self.transition(ConnectionState::Closed);
    }

    /// Toggle between `Authenticated` and `Active` after subscription
    /// changes. No-op outside those two states.
    pub(crate) fn refresh_activity(&self, has_streams: bool) {
        let mut state = self.state.lock();
        *state = match (*state, has_streams) {
            (ConnectionState::Authenticated, true) => ConnectionState::Active,
            (ConnectionState::Active, false) => ConnectionState::Authenticated,
            (current, _) => current,
        };
    }

    /// Subscription set. Hold the guard only for bookkeeping, never across
    /// an `.await`.
    pub(crate) fn subscriptions(&self) -> MutexGuard<'_, SubscriptionSet> {
        self.subscriptions.lock()
    }

    /// Stream names this connection receives.
    pub fn streams(&self) -> Vec<String> {
        self.subscriptions.lock().stream_names()
    }

    // ── Cancellation ────────────────────────────────────────────────

    /// Record why the connection is closing without cancelling it yet.
    /// Returns the reason that sticks: the first one recorded.
    pub fn record_close_reason(&self, reason: CloseReason) -> CloseReason {
        *self.close_reason.get_or_init(|| reason)
    }

    /// Signal every task of this connection to stop, recording the first
    /// reason given.
    pub fn cancel_with(&self, reason: CloseReason) {
        let _ = self.close_reason.set(reason);
        self.cancel.cancel();
    }

    /// First recorded close reason.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    /// Whether the connection has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection is cancelled.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Clone of the cancellation token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ── Liveness ────────────────────────────────────────────────────

    /// Mark the connection as alive (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Subscriber for ClientConnection {
    fn subscriber_id(&self) -> &ConnectionId {
        &self.id
    }

    fn deliver(&self, stream: &str, payload: &Value) -> bool {
        let identifier = match self.subscriptions.lock().get(stream) {
            Some(sub) => sub.identifier.clone(),
            None => return false,
        };
        self.send_frame(&ServerFrame::message(identifier, payload.clone()))
    }
}
