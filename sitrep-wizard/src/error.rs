//! Error types for the sitrep-wizard HTTP API
//!
//! Every failure leaves the API as `{"error": {"code", "message"}}`.

use crate::backend::StoreError;
use crate::services::session_controller::SessionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown inspection (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Malformed request, or a field the active step does not own (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Request not valid in the wizard's current position (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backing store unreachable or failing (502)
    #[error("Backing store error: {0}")]
    Upstream(String),

    /// Draft database or other local state (500)
    #[error("Local state error: {0}")]
    Local(#[from] sitrep_common::Error),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            ApiError::Local(_) => (StatusCode::INTERNAL_SERVER_ERROR, "LOCAL_STATE_ERROR"),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound(err.user_message()),
            StoreError::Validation(_) => ApiError::BadRequest(err.user_message()),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::FieldNotInStep { .. }
            | SessionError::ReadOnlyField(_)
            | SessionError::InvalidValue { .. } => ApiError::BadRequest(err.to_string()),
            SessionError::InvalidTransition { .. }
            | SessionError::Finished
            | SessionError::Superseded => ApiError::Conflict(err.to_string()),
            SessionError::Store(e) => e.into(),
            SessionError::Local(e) => ApiError::Local(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::Upstream(msg) => msg.clone(),
            ApiError::Local(err) => err.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
