//! API error types and response formatting.
//!
//! Error bodies follow the XRPC shape `{"error": "<Name>", "message": "..."}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error type that converts to appropriate HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The requested feed is not served here.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The pagination cursor could not be parsed.
    #[error("malformed cursor: {0}")]
    BadCursor(String),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// SQLite query error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            Self::UnsupportedAlgorithm(feed) => (
                StatusCode::BAD_REQUEST,
                "UnsupportedAlgorithm",
                Some(format!("Unsupported algorithm: {feed}")),
            ),
            Self::BadCursor(msg) => (StatusCode::BAD_REQUEST, "BadCursor", Some(msg.clone())),
            Self::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "InvalidRequest", Some(msg.clone()))
            }
            Self::Database(err) => {
                tracing::error!(error = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    Some("A database error occurred".to_string()),
                )
            }
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    Some("An internal error occurred".to_string()),
                )
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}
