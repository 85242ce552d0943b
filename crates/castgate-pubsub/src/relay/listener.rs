//! Inbound relay links.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use castgate_core::auth::verify_token;
use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MAX_FRAME_BYTES, RelayFrame};
use crate::bus::PubSubBus;

/// How long a peer has to send `hello`.
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept peer links until `cancel` fires, delivering their publishes to
/// `bus` locally.
pub async fn serve_relay(
    listener: TcpListener,
    bus: Arc<PubSubBus>,
    secret: String,
    cancel: CancellationToken,
) {
    let secret: Arc<str> = secret.into();
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "relay listener started");
    }

    loop {
        let accepted = tokio::select! {
            r = listener.accept() => r,
            () = cancel.cancelled() => break,
        };
        match accepted {
            Ok((stream, peer)) => {
                let _ = tokio::spawn(handle_peer(
                    stream,
                    peer,
                    Arc::clone(&bus),
                    Arc::clone(&secret),
                    cancel.child_token(),
                ));
            }
            Err(e) => warn!(error = %e, "relay accept failed"),
        }
    }
    debug!("relay listener stopped");
}

async fn handle_peer(
    stream: TcpStream,
    peer: SocketAddr,
    bus: Arc<PubSubBus>,
    secret: Arc<str>,
    cancel: CancellationToken,
) {
    let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));

    let first = match tokio::time::timeout(HELLO_TIMEOUT, lines.next()).await {
        Ok(Some(Ok(line))) => line,
        Ok(Some(Err(e))) => {
            warn!(%peer, error = %e, "relay handshake failed");
            return;
        }
        Ok(None) => return,
        Err(_) => {
            warn!(%peer, "relay peer sent no hello");
            return;
        }
    };
    let node_id = match serde_json::from_str::<RelayFrame>(&first) {
        Ok(RelayFrame::Hello { node_id, token }) if verify_token(&token, &secret) => node_id,
        Ok(RelayFrame::Hello { .. }) => {
            warn!(%peer, "relay peer presented an invalid token");
            return;
        }
        _ => {
            warn!(%peer, "relay peer did not start with hello");
            return;
        }
    };
    info!(%peer, node_id = %node_id, "relay peer connected");

    loop {
        let next = tokio::select! {
            n = lines.next() => n,
            () = cancel.cancelled() => break,
        };
        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!(%peer, error = %e, "relay read failed");
                break;
            }
            None => break,
        };
        match serde_json::from_str::<RelayFrame>(&line) {
            Ok(RelayFrame::Publish {
                stream, payload, ..
            }) => {
                let _ = bus.deliver_local(&stream, &payload);
            }
            Ok(RelayFrame::Hello { .. }) => {}
            Err(e) => warn!(%peer, error = %e, "invalid relay frame"),
        }
    }
    info!(%peer, node_id = %node_id, "relay peer disconnected");
}
