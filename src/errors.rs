use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the notification store and the `Notifier` facade.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Used both for "does not exist" and "exists but belongs to someone else".
    #[error("notification not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl NotifyError {
    /// Stable machine-readable code, shared by HTTP bodies and socket error events.
    pub fn code(&self) -> &'static str {
        match self {
            NotifyError::Validation(_) => "validation_error",
            NotifyError::NotFound => "not_found",
            NotifyError::Database(_) | NotifyError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show a client. Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            NotifyError::Validation(msg) => msg.clone(),
            NotifyError::NotFound => "notification not found".to_string(),
            NotifyError::Database(_) | NotifyError::Internal(_) => {
                "internal server error".to_string()
            }
        }
    }
}

/// HTTP-facing error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
                "invalid or missing credentials".to_string(),
            ),
            AppError::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                reason.clone(),
            ),
            AppError::Notify(e @ NotifyError::Validation(_)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request_error",
                e.code(),
                e.public_message(),
            ),
            AppError::Notify(e @ NotifyError::NotFound) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                e.code(),
                e.public_message(),
            ),
            AppError::Notify(e) => {
                tracing::error!("notification store error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    e.code(),
                    e.public_message(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
