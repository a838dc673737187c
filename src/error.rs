//! Error types for the Tollgate middleware.

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// These are construction-time and store-level failures. Request-level
/// failures that reach the client are carried as
/// [`AppError`](crate::errorscheme::AppError) through the error channel.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store failures (script errors, unexpected replies)
    #[error("Counter store error: {0}")]
    Store(String),

    /// A counter store call did not complete in time
    #[error("Counter store timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Redis client errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
