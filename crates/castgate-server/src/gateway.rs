//! Connection lifecycle driven by backend RPC replies.
//!
//! The gateway never interprets channel semantics. Every client event
//! becomes one RPC; the reply's status, stream instructions,
//! transmissions, and stop flag are applied the same way for all channels.

use std::sync::Arc;

use castgate_core::frames::{ClientCommand, ClientFrame, DisconnectReason, ServerFrame};
use castgate_core::rpc::{ConnectionEnv, RpcReply, RpcRequest, RpcStatus};
use castgate_core::{GatewayError, Subscription};
use castgate_pubsub::{PubSubBus, Subscriber};
use castgate_rpc::{RpcClient, RpcClientError};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::registry::ConnectionRegistry;
use crate::websocket::connection::{ClientConnection, CloseReason};
use crate::websocket::state::ConnectionState;

/// What the session should do after an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Keep processing.
    Continue,
    /// The backend asked to close the connection.
    Stop,
}

impl ActionOutcome {
    fn from_stop(stop: bool) -> Self {
        if stop { Self::Stop } else { Self::Continue }
    }
}

/// Applies RPC replies to connections, the bus, and the registry.
pub struct Gateway {
    rpc: Arc<RpcClient>,
    bus: Arc<PubSubBus>,
    registry: Arc<ConnectionRegistry>,
}

impl Gateway {
    /// Create a gateway.
    pub fn new(rpc: Arc<RpcClient>, bus: Arc<PubSubBus>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { rpc, bus, registry }
    }

    /// Authenticate a `Connecting` connection.
    ///
    /// On success the connection is `Authenticated` (or `Active` if the
    /// reply attached streams) and registered. On any failure the client
    /// gets a `disconnect` frame, the connection ends `Closed` and
    /// cancelled, and it is never registered.
    #[instrument(skip_all, fields(conn_id = %conn.id))]
    pub async fn connect(
        &self,
        conn: &Arc<ClientConnection>,
        env: &ConnectionEnv,
    ) -> Result<ActionOutcome, GatewayError> {
        let request = RpcRequest::connect(conn.id.clone(), env);
        let reply = match self.rpc.invoke(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                reject(conn, DisconnectReason::ServerError);
                return Err(e.into());
            }
        };

        match reply.status {
            RpcStatus::Ok => {}
            RpcStatus::Failure => {
                write_transmissions(conn, &reply.transmissions);
                reject(conn, DisconnectReason::Unauthorized);
                return Err(GatewayError::AuthRejected {
                    message: reply
                        .error_msg
                        .unwrap_or_else(|| "connection rejected".into()),
                });
            }
            RpcStatus::Error => {
                reject(conn, DisconnectReason::ServerError);
                return Err(GatewayError::RpcUnavailable {
                    message: reply.error_msg.unwrap_or_else(|| "backend error".into()),
                });
            }
        }

        if let Some(identifiers) = &reply.identifiers {
            conn.set_identifiers(identifiers.clone());
        }
        if !conn.transition(ConnectionState::Authenticated) {
            return Err(GatewayError::Internal {
                message: "connection closed during connect".into(),
            });
        }
        self.registry.add(Arc::clone(conn));
        write_transmissions(conn, &reply.transmissions);
        if conn.is_cancelled() {
            debug!("connection faulted while writing connect transmissions");
            return Ok(ActionOutcome::Continue);
        }
        let _ = self.apply_streams(conn, None, &reply);

        info!(identifiers = ?conn.identifiers(), "connection authenticated");
        Ok(ActionOutcome::from_stop(reply.stop))
    }

    /// Forward one client action to the backend and apply the reply.
    ///
    /// If the connection starts closing while the call is in flight, the
    /// reply is discarded.
    #[instrument(skip_all, fields(conn_id = %conn.id, command = frame.command.as_str()))]
    pub async fn perform(&self, conn: &Arc<ClientConnection>, frame: ClientFrame) -> ActionOutcome {
        if !conn.state().is_open() {
            debug!(state = %conn.state(), "ignoring action");
            return ActionOutcome::Continue;
        }

        let channel_state = conn.subscriptions().channel_state(&frame.identifier);
        let payload = json!({
            "command": frame.command,
            "identifier": frame.identifier,
            "data": frame.data,
            "state": channel_state,
        });
        let request = RpcRequest::command(conn.id.clone(), conn.identifiers(), payload);

        // Run detached so a closing connection can stop waiting without
        // cancelling the backend call half-way.
        let rpc = Arc::clone(&self.rpc);
        let call = tokio::spawn(async move { rpc.invoke(&request).await });
        let result = tokio::select! {
            joined = call => joined.unwrap_or_else(|e| {
                Err(RpcClientError::Transport { message: format!("rpc task failed: {e}") })
            }),
            () = conn.closed() => {
                debug!("connection closed with command in flight, discarding reply");
                return ActionOutcome::Continue;
            }
        };

        match result {
            Ok(reply) => self.apply_command_reply(conn, &frame, reply),
            Err(e) => {
                warn!(error = %e, "command rpc failed");
                if frame.command == ClientCommand::Subscribe {
                    let _ = conn.send_frame(&ServerFrame::reject_subscription(&frame.identifier));
                }
                ActionOutcome::Continue
            }
        }
    }

    fn apply_command_reply(
        &self,
        conn: &Arc<ClientConnection>,
        frame: &ClientFrame,
        reply: RpcReply,
    ) -> ActionOutcome {
        match reply.status {
            RpcStatus::Ok => {
                if !self.apply_streams(conn, Some(frame), &reply) {
                    return ActionOutcome::Continue;
                }
                if frame.command == ClientCommand::Subscribe {
                    let _ = conn.send_frame(&ServerFrame::confirm_subscription(&frame.identifier));
                }
            }
            RpcStatus::Failure => {
                debug!(error_msg = ?reply.error_msg, "command rejected by backend");
                if frame.command == ClientCommand::Subscribe {
                    let _ = conn.send_frame(&ServerFrame::reject_subscription(&frame.identifier));
                }
            }
            RpcStatus::Error => {
                warn!(error_msg = ?reply.error_msg, "backend failed to process command");
                if frame.command == ClientCommand::Subscribe {
                    let _ = conn.send_frame(&ServerFrame::reject_subscription(&frame.identifier));
                }
            }
        }
        write_transmissions(conn, &reply.transmissions);
        ActionOutcome::from_stop(reply.stop)
    }

    /// Apply stream instructions from an `ok` reply. Returns `false` if the
    /// connection is already tearing down and nothing was applied.
    fn apply_streams(
        &self,
        conn: &Arc<ClientConnection>,
        frame: Option<&ClientFrame>,
        reply: &RpcReply,
    ) -> bool {
        let mut subs = conn.subscriptions();
        if conn.state().is_terminating() {
            return false;
        }

        let mut removed = Vec::new();
        if let Some(frame) = frame {
            if frame.command == ClientCommand::Unsubscribe {
                removed.extend(subs.remove_channel(&frame.identifier));
            } else if reply.stop_streams {
                removed.extend(subs.remove_streams_of(&frame.identifier));
            }
        }
        removed.extend(
            reply
                .streams
                .unsubscribe
                .iter()
                .filter_map(|stream| subs.remove(stream)),
        );
        for sub in &removed {
            let _ = self.bus.unsubscribe(&sub.stream, &conn.id);
        }

        let identifier = frame.map(|f| f.identifier.clone());
        let subscriber: Arc<dyn Subscriber> = Arc::clone(conn) as Arc<dyn Subscriber>;
        for stream in &reply.streams.subscribe {
            let _ = subs.add(Subscription::new(
                conn.id.clone(),
                stream.clone(),
                identifier.clone(),
                reply.state.clone(),
            ));
            self.bus.subscribe(stream, Arc::clone(&subscriber));
        }

        if let Some(frame) = frame {
            match frame.command {
                ClientCommand::Subscribe => {
                    subs.add_channel(&frame.identifier, reply.state.clone());
                }
                ClientCommand::Message => {
                    if let Some(state) = &reply.state {
                        subs.set_channel_state(&frame.identifier, state.clone());
                    }
                }
                ClientCommand::Unsubscribe => {}
            }
        }

        conn.refresh_activity(!subs.is_empty());
        debug!(
            subscribed = reply.streams.subscribe.len(),
            removed = removed.len(),
            total = subs.len(),
            "streams updated"
        );
        true
    }

    /// Tear a connection down. Idempotent.
    ///
    /// Sends the reason's notice frame, drops every subscription, and
    /// deregisters the connection. Authenticated connections also get a
    /// fire-and-forget `disconnect` RPC. A reason recorded earlier (an
    /// overflow, say) wins over `reason`.
    #[instrument(skip_all, fields(conn_id = %conn.id, reason = reason.as_str()))]
    pub fn close(&self, conn: &Arc<ClientConnection>, reason: CloseReason) {
        if !conn.begin_closing() {
            return;
        }
        let reason = conn.record_close_reason(reason);
        if let Some(notice) = reason.notice() {
            let _ = conn.send_frame(&ServerFrame::disconnect(notice));
        }

        let (streams, channels) = {
            let mut subs = conn.subscriptions();
            let channels = subs.channel_identifiers();
            (subs.drain(), channels)
        };
        for sub in &streams {
            let _ = self.bus.unsubscribe(&sub.stream, &conn.id);
        }

        if self.registry.remove(&conn.id).is_some() {
            let request =
                RpcRequest::disconnect(conn.id.clone(), conn.identifiers(), channels, reason.as_str());
            let rpc = Arc::clone(&self.rpc);
            drop(tokio::spawn(async move {
                if let Err(e) = rpc.invoke(&request).await {
                    debug!(error = %e, "disconnect rpc failed");
                }
            }));
        }

        conn.mark_closed();
        conn.cancel_with(reason);
        info!(streams = streams.len(), age = ?conn.age(), "connection closed");
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Pub/sub bus.
    pub fn bus(&self) -> &Arc<PubSubBus> {
        &self.bus
    }
}

fn write_transmissions(conn: &ClientConnection, transmissions: &[Value]) {
    for transmission in transmissions {
        if !conn.send_transmission(transmission) {
            break;
        }
    }
}

fn reject(conn: &ClientConnection, reason: DisconnectReason) {
    let _ = conn.send_frame(&ServerFrame::disconnect(reason));
    if conn.begin_closing() {
        conn.mark_closed();
    }
    conn.cancel_with(CloseReason::Rejected);
}
