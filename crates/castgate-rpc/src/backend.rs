//! Transport to the application backend.

use async_trait::async_trait;
use castgate_core::rpc::{RpcReply, RpcRequest};
use tracing::debug;

use crate::errors::RpcClientError;

/// One request, one reply. Implementations do not enforce timeouts or
/// concurrency limits; [`RpcClient`](crate::RpcClient) does.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Deliver `request` and return the backend's reply.
    async fn call(&self, request: &RpcRequest) -> Result<RpcReply, RpcClientError>;
}

/// JSON over HTTP POST.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpBackend {
    /// Create a backend posting to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Create with a preconfigured client (shared pools, proxies).
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn call(&self, request: &RpcRequest) -> Result<RpcReply, RpcClientError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| RpcClientError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcClientError::Transport {
                message: format!("backend returned HTTP {status}"),
            });
        }

        let body = response.bytes().await.map_err(|e| RpcClientError::Transport {
            message: e.to_string(),
        })?;
        let reply: RpcReply =
            serde_json::from_slice(&body).map_err(|e| RpcClientError::InvalidReply {
                message: e.to_string(),
            })?;
        debug!(
            command = request.command_type.as_str(),
            status = ?reply.status,
            "backend replied"
        );
        Ok(reply)
    }
}
