//! Outbound link to one peer.

use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{MAX_FRAME_BYTES, RelayError, record_failure};

type Link = Framed<TcpStream, LinesCodec>;

/// Drain `rx` into `addr`, connecting on demand.
///
/// A frame that cannot be written is dropped; the next frame triggers a
/// fresh connect attempt.
pub(super) async fn run_link(
    addr: String,
    hello: Arc<str>,
    mut rx: mpsc::Receiver<Arc<str>>,
    connect_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut link: Option<Link> = None;

    loop {
        let line = tokio::select! {
            line = rx.recv() => line,
            () = cancel.cancelled() => break,
        };
        let Some(line) = line else { break };

        if link.is_none() {
            match connect(&addr, &hello, connect_timeout).await {
                Ok(l) => {
                    info!(peer = %addr, "relay link established");
                    link = Some(l);
                }
                Err(e) => {
                    record_failure(e);
                    continue;
                }
            }
        }

        if let Some(l) = link.as_mut() {
            if let Err(source) = l.send(&*line).await {
                record_failure(RelayError::Link {
                    peer: addr.clone(),
                    source,
                });
                link = None;
            }
        }
    }
    debug!(peer = %addr, "relay link stopped");
}

async fn connect(addr: &str, hello: &str, timeout: Duration) -> Result<Link, RelayError> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(RelayError::Connect {
                peer: addr.to_owned(),
                message: e.to_string(),
            });
        }
        Err(_) => {
            return Err(RelayError::Connect {
                peer: addr.to_owned(),
                message: format!("timed out after {timeout:?}"),
            });
        }
    };
    let _ = stream.set_nodelay(true);

    let mut link = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
    link.send(hello)
        .await
        .map_err(|source| RelayError::Link {
            peer: addr.to_owned(),
            source,
        })?;
    Ok(link)
}
