//! Rendering of reported errors into responses.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::AppError;
use crate::config::ErrorSchemeConfig;

/// Builds the response for a reported error.
pub trait ErrorResponder: Send + Sync {
    /// Render `err` as a response.
    fn respond(&self, err: &AppError) -> Response;
}

impl<F> ErrorResponder for F
where
    F: Fn(&AppError) -> Response + Send + Sync,
{
    fn respond(&self, err: &AppError) -> Response {
        self(err)
    }
}

/// JSON body produced by [`JsonErrorResponder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Default responder: the error's status code with a JSON [`ErrorBody`].
///
/// `details` carries the internal cause only in developer mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonErrorResponder {
    dev_mode: bool,
}

impl JsonErrorResponder {
    /// Create a responder with developer mode set explicitly.
    pub fn new(dev_mode: bool) -> Self {
        Self { dev_mode }
    }

    /// Create a responder, reading developer mode from the environment as
    /// described by `config`.
    pub fn from_config(config: &ErrorSchemeConfig) -> Self {
        Self::new(config.dev_mode_enabled())
    }

    /// Create a responder using the default developer mode variable.
    pub fn from_env() -> Self {
        Self::from_config(&ErrorSchemeConfig::default())
    }

    /// Whether internal causes are rendered.
    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// Build the body for `err`.
    pub fn body(&self, err: &AppError) -> ErrorBody {
        let details = if self.dev_mode {
            err.internal.as_ref().map(|cause| cause.to_string())
        } else {
            None
        };

        ErrorBody {
            status: err.code.as_u16(),
            message: err.message.clone(),
            details,
        }
    }
}

impl ErrorResponder for JsonErrorResponder {
    fn respond(&self, err: &AppError) -> Response {
        (err.code, Json(self.body(err))).into_response()
    }
}
