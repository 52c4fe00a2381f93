use crate::services::upload_service::GrantError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Whether the client should offer a "try again" affordance.
    pub retryable: bool,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            retryable: false,
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16(),
            "retryable": self.retryable,
        }));

        (self.status, body).into_response()
    }
}

impl From<GrantError> for AppError {
    fn from(err: GrantError) -> Self {
        match err {
            GrantError::Validation(e) => AppError::bad_request(e.to_string()),
            GrantError::StorageAuth(e) => {
                // Full cause stays in the log; the caller only learns that
                // storage refused and whether retrying makes sense.
                tracing::warn!("storage authorization error: {:?}", e);
                AppError::new(StatusCode::BAD_GATEWAY, "could not authorize upload")
                    .retryable(e.is_retryable())
            }
        }
    }
}
