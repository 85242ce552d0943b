//! Ticket pool bounding concurrent backend calls.

use std::sync::Arc;
use std::time::Duration;

use castgate_core::metrics::{RPC_CAPACITY_EXHAUSTED_TOTAL, RPC_IN_FLIGHT};
use metrics::{counter, gauge};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use crate::errors::RpcClientError;

/// Fixed-size pool of call tickets.
///
/// The in-flight count can never exceed `ceiling`: a ticket is a semaphore
/// permit, released when the [`Ticket`] drops.
pub struct CapacityController {
    semaphore: Arc<Semaphore>,
    ceiling: usize,
    wait_budget: Duration,
}

impl CapacityController {
    /// Create a pool of `ceiling` tickets. Callers wait at most
    /// `wait_budget` for one.
    pub fn new(ceiling: usize, wait_budget: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(ceiling)),
            ceiling,
            wait_budget,
        }
    }

    /// Take a ticket, waiting up to the budget.
    pub async fn acquire(&self) -> Result<Ticket, RpcClientError> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        match tokio::time::timeout(self.wait_budget, acquire).await {
            Ok(Ok(permit)) => {
                gauge!(RPC_IN_FLIGHT).increment(1.0);
                Ok(Ticket { _permit: permit })
            }
            // Semaphore is never closed; treat it as exhaustion if it ever is.
            Ok(Err(_)) | Err(_) => {
                counter!(RPC_CAPACITY_EXHAUSTED_TOTAL).increment(1);
                let waited_ms = u64::try_from(self.wait_budget.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    ceiling = self.ceiling,
                    waited_ms, "rpc capacity exhausted"
                );
                Err(RpcClientError::CapacityExhausted { waited_ms })
            }
        }
    }

    /// Configured ceiling.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Tickets currently held.
    pub fn in_flight(&self) -> usize {
        self.ceiling - self.semaphore.available_permits()
    }
}

/// Permission to run one backend call. Released on drop.
pub struct Ticket {
    _permit: OwnedSemaphorePermit,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        gauge!(RPC_IN_FLIGHT).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn acquire_within_ceiling() {
        let cc = CapacityController::new(2, Duration::from_millis(10));
        let a = cc.acquire().await.unwrap();
        let b = cc.acquire().await.unwrap();
        assert_eq!(cc.in_flight(), 2);
        drop(a);
        assert_eq!(cc.in_flight(), 1);
        drop(b);
        assert_eq!(cc.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_fails_after_budget() {
        let cc = CapacityController::new(1, Duration::from_millis(50));
        let _held = cc.acquire().await.unwrap();

        let started = tokio::time::Instant::now();
        let err = cc.acquire().await.err().unwrap();
        assert_matches!(err, RpcClientError::CapacityExhausted { waited_ms: 50 });
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(cc.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_gets_ticket_when_released_in_time() {
        let cc = Arc::new(CapacityController::new(1, Duration::from_millis(100)));
        let held = cc.acquire().await.unwrap();

        let waiter = {
            let cc = Arc::clone(&cc);
            tokio::spawn(async move { cc.acquire().await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn zero_budget_fails_immediately_when_full() {
        let cc = CapacityController::new(1, Duration::ZERO);
        let _held = cc.acquire().await.unwrap();
        assert!(cc.acquire().await.is_err());
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_ceiling() {
        let cc = Arc::new(CapacityController::new(3, Duration::from_millis(5)));
        let mut tickets = Vec::new();
        for _ in 0..10 {
            if let Ok(t) = cc.acquire().await {
                tickets.push(t);
            }
            assert!(cc.in_flight() <= cc.ceiling());
        }
        assert_eq!(tickets.len(), 3);
    }
}
