//! Error types for dispatcher construction and webhook requests.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Invalid dispatcher configuration; raised at construction, before serving.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("channel secret is empty")]
    EmptySecret,
    #[error("handler timeout must be positive")]
    NonPositiveTimeout,
}

/// Rejected webhook request. No handler runs for a rejected request.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("missing signature header")]
    MissingSignature,
    #[error("signature mismatch")]
    InvalidSignature,
    #[error("malformed callback body: {0}")]
    MalformedBody(#[from] serde_json::Error),
    /// Body could not be read (too large, or the connection failed mid-body).
    #[error("unreadable request body: {0}")]
    UnreadableBody(String),
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        StatusCode::BAD_REQUEST.into_response()
    }
}
