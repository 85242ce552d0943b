//! `invoke(request) -> reply` with timeout and capacity gating.

use std::sync::Arc;
use std::time::{Duration, Instant};

use castgate_core::metrics::{RPC_ERRORS_TOTAL, RPC_REQUEST_DURATION_SECONDS, RPC_REQUESTS_TOTAL};
use castgate_core::rpc::{RpcReply, RpcRequest};
use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::capacity::CapacityController;
use crate::errors::RpcClientError;

/// Bounded-concurrency client for the application backend.
pub struct RpcClient {
    backend: Arc<dyn Backend>,
    capacity: CapacityController,
    timeout: Duration,
}

impl RpcClient {
    /// Create a client.
    pub fn new(backend: Arc<dyn Backend>, capacity: CapacityController, timeout: Duration) -> Self {
        Self {
            backend,
            capacity,
            timeout,
        }
    }

    /// Issue one call.
    ///
    /// Holds a ticket for the whole call. Fails with `CapacityExhausted`
    /// when none frees up within the wait budget, and with `Timeout` when
    /// the backend does not answer within the per-call timeout.
    pub async fn invoke(&self, request: &RpcRequest) -> Result<RpcReply, RpcClientError> {
        let command = request.command_type.as_str();
        counter!(RPC_REQUESTS_TOTAL, "type" => command).increment(1);

        let _ticket = match self.capacity.acquire().await {
            Ok(ticket) => ticket,
            Err(e) => {
                counter!(RPC_ERRORS_TOTAL, "type" => command, "kind" => e.kind()).increment(1);
                return Err(e);
            }
        };

        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.backend.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(RpcClientError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        let elapsed = start.elapsed();
        histogram!(RPC_REQUEST_DURATION_SECONDS, "type" => command).record(elapsed.as_secs_f64());

        match &result {
            Ok(reply) => debug!(
                command,
                conn_id = %request.connection_id,
                status = ?reply.status,
                elapsed = ?elapsed,
                "rpc completed"
            ),
            Err(e) => {
                counter!(RPC_ERRORS_TOTAL, "type" => command, "kind" => e.kind()).increment(1);
                warn!(command, conn_id = %request.connection_id, error = %e, "rpc failed");
            }
        }
        result
    }

    /// Ticket pool.
    pub fn capacity(&self) -> &CapacityController {
        &self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use castgate_core::ConnectionId;
    use castgate_core::rpc::{ConnectionEnv, RpcStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies `ok` after `delay`, tracking peak concurrency.
    struct SlowBackend {
        delay: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SlowBackend {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Backend for SlowBackend {
        async fn call(&self, _request: &RpcRequest) -> Result<RpcReply, RpcClientError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let _ = self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(RpcReply::ok())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl Backend for FailingBackend {
        async fn call(&self, _request: &RpcRequest) -> Result<RpcReply, RpcClientError> {
            Err(RpcClientError::Transport {
                message: "connection refused".into(),
            })
        }
    }

    fn request() -> RpcRequest {
        RpcRequest::connect(ConnectionId::new(), &ConnectionEnv::default())
    }

    fn client(backend: Arc<dyn Backend>, ceiling: usize, wait_ms: u64, timeout_ms: u64) -> RpcClient {
        RpcClient::new(
            backend,
            CapacityController::new(ceiling, Duration::from_millis(wait_ms)),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn invoke_returns_reply() {
        let backend = SlowBackend::new(Duration::from_millis(10));
        let client = client(backend.clone(), 4, 100, 1_000);
        let reply = client.invoke(&request()).await.unwrap();
        assert_eq!(reply.status, RpcStatus::Ok);
        assert_eq!(client.capacity().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let backend = SlowBackend::new(Duration::from_secs(10));
        let client = client(backend, 4, 100, 200);
        let err = client.invoke(&request()).await.unwrap_err();
        assert_matches!(err, RpcClientError::Timeout { timeout_ms: 200 });
        assert_eq!(client.capacity().in_flight(), 0);
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let client = client(Arc::new(FailingBackend), 4, 100, 1_000);
        let err = client.invoke(&request()).await.unwrap_err();
        assert_matches!(err, RpcClientError::Transport { .. });
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_fails_fast_when_ceiling_is_one() {
        let backend = SlowBackend::new(Duration::from_secs(1));
        let client = Arc::new(client(backend.clone(), 1, 50, 5_000));

        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.invoke(&request()).await })
        };
        // Let the first call take its ticket.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let second = client.invoke(&request()).await;
        assert_matches!(second, Err(RpcClientError::CapacityExhausted { waited_ms: 50 }));

        assert!(first.await.unwrap().is_ok());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_ceiling() {
        let backend = SlowBackend::new(Duration::from_millis(20));
        let client = Arc::new(client(backend.clone(), 3, 10_000, 5_000));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.invoke(&request()).await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 12);
        assert!(backend.peak.load(Ordering::SeqCst) <= 3);
    }
}
