//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("version conflict: concurrent modification detected")]
    VersionConflict,

    #[error("account not found: {0}")]
    NotFound(String),

    // Server errors (5xx)
    #[error("event log error: {0}")]
    EventLog(#[from] crate::event_log::EventLogError),

    #[error("view store error: {0}")]
    View(#[from] crate::projection::ViewError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "errorMessage")]
    pub error_message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            // 400 Bad Request: validation failures and duplicate create
            AppError::Domain(_) | AppError::Conflict(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found: rehydration of an unknown id
            AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict: optimistic-concurrency loss; the caller may retry
            AppError::VersionConflict => StatusCode::CONFLICT,

            // 500 Internal Server Error
            AppError::EventLog(e) => {
                tracing::error!("event log error: {:?}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::View(e) => {
                tracing::error!("view store error: {:?}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Config(e) => {
                tracing::error!("config error: {:?}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ErrorResponse {
            error_message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
