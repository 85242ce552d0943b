//! Broadcast ingress: backend-originated messages onto the bus.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use castgate_core::auth::verify_token;
use castgate_core::metrics::BROADCAST_REQUESTS_TOTAL;
use castgate_core::{BroadcastMessage, GatewayError};
use castgate_pubsub::PubSubBus;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ApiError;
use crate::server::AppState;

/// Result of an accepted broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BroadcastAck {
    /// Stream published to.
    pub stream: String,
    /// Local subscribers the payload was queued for.
    pub recipients: usize,
}

/// Authenticates broadcasts and publishes them.
pub struct BroadcastReceiver {
    bus: Arc<PubSubBus>,
    secret: String,
}

impl BroadcastReceiver {
    /// Create a receiver. An empty secret rejects every broadcast.
    pub fn new(bus: Arc<PubSubBus>, secret: impl Into<String>) -> Self {
        Self {
            bus,
            secret: secret.into(),
        }
    }

    /// Authenticate and publish one message.
    pub fn receive(&self, message: &BroadcastMessage) -> Result<BroadcastAck, GatewayError> {
        self.check(message)?;
        Ok(self.publish(message))
    }

    /// Authenticate every message, then publish them in order. Nothing is
    /// published if any message is rejected.
    pub fn receive_batch(
        &self,
        messages: &[BroadcastMessage],
    ) -> Result<Vec<BroadcastAck>, GatewayError> {
        for message in messages {
            self.check(message)?;
        }
        Ok(messages.iter().map(|m| self.publish(m)).collect())
    }

    fn check(&self, message: &BroadcastMessage) -> Result<(), GatewayError> {
        if !verify_token(&message.token, &self.secret) {
            return Err(GatewayError::BroadcastUnauthenticated);
        }
        if message.stream.is_empty() {
            return Err(GatewayError::InvalidFrame {
                message: "stream must not be empty".into(),
            });
        }
        Ok(())
    }

    fn publish(&self, message: &BroadcastMessage) -> BroadcastAck {
        let recipients = self.bus.publish(&message.stream, &message.payload);
        debug!(stream = %message.stream, recipients, "broadcast accepted");
        BroadcastAck {
            stream: message.stream.clone(),
            recipients,
        }
    }
}

/// One message or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum BroadcastBody {
    /// `[{stream, payload, token}, ...]`
    Batch(Vec<BroadcastMessage>),
    /// `{stream, payload, token}`
    Single(BroadcastMessage),
}

/// POST broadcast handler. `202 {accepted, recipients}` on success.
pub async fn broadcast_handler(
    State(state): State<AppState>,
    body: Result<Json<BroadcastBody>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let result = match body {
        Ok(Json(BroadcastBody::Single(message))) => state.broadcast.receive(&message).map(|a| vec![a]),
        Ok(Json(BroadcastBody::Batch(messages))) => state.broadcast.receive_batch(&messages),
        Err(rejection) => Err(GatewayError::InvalidFrame {
            message: rejection.body_text(),
        }),
    };

    match result {
        Ok(acks) => {
            counter!(BROADCAST_REQUESTS_TOTAL, "outcome" => "accepted").increment(1);
            let recipients: usize = acks.iter().map(|a| a.recipients).sum();
            Ok((
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "accepted": acks.len(),
                    "recipients": recipients,
                })),
            ))
        }
        Err(e) => {
            counter!(BROADCAST_REQUESTS_TOTAL, "outcome" => e.code()).increment(1);
            warn!(code = e.code(), error = %e, "broadcast rejected");
            Err(e.into())
        }
    }
}
