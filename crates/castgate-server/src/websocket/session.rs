//! `WebSocket` session lifecycle: one connected client from upgrade through
//! disconnect.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::http::{HeaderMap, Uri};
use castgate_core::ConnectionId;
use castgate_core::frames::{ClientFrame, ServerFrame};
use castgate_core::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use castgate_core::rpc::ConnectionEnv;
use castgate_settings::ServerSettings;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, CloseReason};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::gateway::{ActionOutcome, Gateway};

/// Sub-protocol negotiated on upgrade.
pub const SUBPROTOCOL: &str = "actioncable-v1-json";

/// How long the writer may take to flush queued frames after close.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection limits, derived from [`ServerSettings`].
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Outbound frame buffer size.
    pub outbound_buffer_size: usize,
    /// Inbound action queue size.
    pub action_queue_size: usize,
    /// Interval between ping frames and heartbeat checks.
    pub ping_interval: Duration,
    /// Silence tolerated before the connection is faulted.
    pub heartbeat_timeout: Duration,
    /// Max inbound message size.
    pub max_message_size: usize,
    /// Lowercase header names forwarded on `connect`.
    pub forward_headers: Vec<String>,
}

impl From<&ServerSettings> for SessionConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            outbound_buffer_size: settings.outbound_buffer_size,
            action_queue_size: settings.action_queue_size,
            ping_interval: settings.ping_interval(),
            heartbeat_timeout: settings.heartbeat_timeout(),
            max_message_size: settings.max_message_size,
            forward_headers: settings
                .forward_headers
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        }
    }
}

/// Build the `connect` environment from the upgrade request, keeping only
/// allow-listed headers.
pub fn connection_env(uri: &Uri, headers: &HeaderMap, allowed: &[String]) -> ConnectionEnv {
    let headers: BTreeMap<String, String> = allowed
        .iter()
        .filter_map(|name| {
            let value = headers.get(name.as_str())?.to_str().ok()?;
            Some((name.clone(), value.to_owned()))
        })
        .collect();
    ConnectionEnv {
        url: uri.to_string(),
        headers,
    }
}

/// Run a `WebSocket` session for a connected client.
///
/// 1. Authenticates through the backend `connect` RPC
/// 2. Queues inbound frames for sequential processing
/// 3. Forwards outbound frames and periodic pings
/// 4. Faults the connection on heartbeat timeout or buffer overflow
/// 5. Tears down through [`Gateway::close`] on every exit path
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    env: ConnectionEnv,
    gateway: Arc<Gateway>,
    config: Arc<SessionConfig>,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(config.outbound_buffer_size);
    let connection = Arc::new(ClientConnection::new(conn_id, send_tx));

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let outbound = tokio::spawn(forward_outbound(
        ws_tx,
        send_rx,
        connection.clone(),
        config.ping_interval,
    ));

    let reason = match gateway.connect(&connection, &env).await {
        Err(e) => {
            info!(code = e.code(), error = %e, "connection rejected");
            CloseReason::Rejected
        }
        Ok(ActionOutcome::Stop) => {
            gateway.close(&connection, CloseReason::Stopped);
            CloseReason::Stopped
        }
        Ok(ActionOutcome::Continue) => {
            drive(&mut ws_rx, &connection, &gateway, &config, &shutdown).await
        }
    };

    gateway.close(&connection, reason);

    let writer = outbound.abort_handle();
    if tokio::time::timeout(FLUSH_TIMEOUT, outbound).await.is_err() {
        debug!("outbound writer did not flush in time");
        writer.abort();
    }

    let reason = connection.close_reason().unwrap_or(reason);
    info!(
        reason = reason.as_str(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Read loop for an authenticated connection. Returns why it stopped.
async fn drive(
    ws_rx: &mut SplitStream<WebSocket>,
    connection: &Arc<ClientConnection>,
    gateway: &Arc<Gateway>,
    config: &SessionConfig,
    shutdown: &CancellationToken,
) -> CloseReason {
    let (action_tx, action_rx) = mpsc::channel::<ClientFrame>(config.action_queue_size);
    let processor = tokio::spawn(process_actions(
        action_rx,
        connection.clone(),
        gateway.clone(),
    ));

    let hb_conn = connection.clone();
    let hb_gateway = gateway.clone();
    let hb_cancel = connection.cancel_token();
    let (interval, timeout) = (config.ping_interval, config.heartbeat_timeout);
    let heartbeat = tokio::spawn(async move {
        if run_heartbeat(hb_conn.clone(), interval, timeout, hb_cancel).await
            == HeartbeatResult::TimedOut
        {
            warn!(conn_id = %hb_conn.id, "client unresponsive, disconnecting");
            hb_gateway.close(&hb_conn, CloseReason::HeartbeatTimeout);
        }
    });

    let reason = read_frames(ws_rx, connection, &action_tx, shutdown).await;

    drop(action_tx);
    gateway.close(connection, reason);
    let _ = processor.await;
    let _ = heartbeat.await;
    connection.close_reason().unwrap_or(reason)
}

async fn read_frames(
    ws_rx: &mut SplitStream<WebSocket>,
    connection: &Arc<ClientConnection>,
    action_tx: &mpsc::Sender<ClientFrame>,
    shutdown: &CancellationToken,
) -> CloseReason {
    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = connection.closed() => {
                return connection.close_reason().unwrap_or(CloseReason::Stopped);
            }
            () = shutdown.cancelled() => return CloseReason::Shutdown,
        };

        let text = match msg {
            Some(Ok(Message::Text(t))) => t.to_string(),
            Some(Ok(Message::Binary(data))) => {
                if let Ok(s) = std::str::from_utf8(&data) {
                    s.to_owned()
                } else {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                connection.mark_alive();
                continue;
            }
            Some(Ok(Message::Close(_))) | None => return CloseReason::ClientClosed,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                return CloseReason::TransportError;
            }
        };
        connection.mark_alive();

        let frame = match ClientFrame::parse(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "invalid client frame");
                continue;
            }
        };

        tokio::select! {
            sent = action_tx.send(frame) => {
                if sent.is_err() {
                    return connection.close_reason().unwrap_or(CloseReason::Stopped);
                }
            }
            () = connection.closed() => {
                return connection.close_reason().unwrap_or(CloseReason::Stopped);
            }
        }
    }
}

/// Apply queued actions one at a time, in arrival order.
async fn process_actions(
    mut rx: mpsc::Receiver<ClientFrame>,
    connection: Arc<ClientConnection>,
    gateway: Arc<Gateway>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = connection.closed() => break,
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else { break };

        if gateway.perform(&connection, frame).await == ActionOutcome::Stop {
            gateway.close(&connection, CloseReason::Stopped);
            break;
        }
    }
}

/// Write queued frames and pings to the socket. On cancellation, flushes
/// what is already queued and sends a close frame.
async fn forward_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    ping_interval: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                    connection.cancel_with(CloseReason::TransportError);
                    return;
                }
            }
            _ = ping.tick() => {
                let frame = ServerFrame::ping(chrono::Utc::now().timestamp());
                let sent = ws_tx.send(Message::Text(frame.to_json().into())).await.is_ok()
                    && ws_tx.send(Message::Ping(Vec::new().into())).await.is_ok();
                if !sent {
                    connection.cancel_with(CloseReason::TransportError);
                    return;
                }
            }
            () = connection.closed() => break,
        }
    }

    while let Ok(text) = rx.try_recv() {
        if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
            return;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}
