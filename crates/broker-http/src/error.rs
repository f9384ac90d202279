//! Maps [`BrokerError`] to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use broker_shared::BrokerError;
use serde::Serialize;

/// Wraps a [`BrokerError`] so it can be returned directly from an axum
/// handler via `?`.
pub struct ApiError(pub BrokerError);

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        ApiError(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BrokerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            BrokerError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            BrokerError::MessageNotFound(_) | BrokerError::ThreadNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            BrokerError::InvalidTransition { .. } | BrokerError::NotCancellable(_) => {
                StatusCode::CONFLICT
            }
            BrokerError::Timeout | BrokerError::Responder(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::warn!(kind = self.0.kind(), %status, "request failed");

        let body = ErrorBody {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
