//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::{ErrorKind, SagaError};

/// API-level error type that maps to HTTP responses.
///
/// Every error body has the shape `{"error": <message>, "fatal": <bool>}`;
/// `fatal` tells the caller whether resubmitting the same request can help.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, fatal) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, false),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, true),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg, false)
            }
        };

        let body = serde_json::json!({ "error": message, "fatal": fatal });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String, bool) {
    if let SagaError::RunNotFound(_) = err {
        return (StatusCode::NOT_FOUND, err.to_string(), false);
    }
    match err.kind() {
        ErrorKind::Validation | ErrorKind::Fatal => (StatusCode::BAD_REQUEST, err.to_string(), true),
        ErrorKind::StepExecution | ErrorKind::Unexpected => {
            tracing::error!(error = %err, kind = ?err.kind(), "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), false)
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
