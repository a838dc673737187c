//! The error record handlers report instead of writing a response.

use axum::http::StatusCode;
use thiserror::Error;

/// A request failure to be rendered by the error scheme middleware.
///
/// `message` is shown to clients. `internal` is diagnostic detail and is only
/// rendered when developer mode is on.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AppError {
    /// Status code of the rendered response
    pub code: StatusCode,
    /// Client-safe message
    pub message: String,
    /// Underlying cause, if any
    pub internal: Option<anyhow::Error>,
}

impl AppError {
    /// Create an error record without an internal cause.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            internal: None,
        }
    }

    /// A `500 Internal Server Error` record.
    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Attach the underlying cause.
    pub fn with_internal(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.internal = Some(cause.into());
        self
    }
}
