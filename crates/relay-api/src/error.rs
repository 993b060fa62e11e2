//! Wire error shape: `{error: true, message, code[, details]}` with a matching HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_types::RelayError;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    pub error: bool,
    pub message: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            code,
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn internal(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..Self::new(500, message)
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        let code = e.code();
        match e {
            RelayError::Validation(m)
            | RelayError::NotFound(m)
            | RelayError::Permission(m)
            | RelayError::Conflict(m) => ApiError::new(code, m),
            RelayError::Persist(inner) => {
                tracing::error!(error = %inner, "store failure while serving request");
                ApiError::internal("Failed to access event store", inner.to_string())
            }
            RelayError::Transport(inner) => {
                ApiError::internal("Internal server error", inner.to_string())
            }
            RelayError::Internal(details) => ApiError::internal("Internal server error", details),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}
