//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use castgate_core::GatewayError;

/// A [`GatewayError`] rendered as a JSON `{code, message}` response.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl ApiError {
    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GatewayError::BroadcastUnauthenticated | GatewayError::AuthRejected { .. } => {
                StatusCode::UNAUTHORIZED
            }
            GatewayError::InvalidFrame { .. } => StatusCode::BAD_REQUEST,
            GatewayError::RpcUnavailable { .. }
            | GatewayError::CapacityExhausted { .. }
            | GatewayError::PeerUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.0.to_error_body())).into_response()
    }
}
