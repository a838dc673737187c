//! Centralized error reporting.
//!
//! Handlers either write their own response or report an [`AppError`] and
//! leave rendering to [`ErrorSchemeLayer`], which also turns panics into
//! `500` responses.

mod channel;
mod error;
mod layer;
mod responder;

pub use channel::{is_written, report_error, unwritten, ErrorChannel, Unwritten};
pub use error::AppError;
pub use layer::{ErrorSchemeLayer, ErrorSchemeService, PANIC_MESSAGE};
pub use responder::{ErrorBody, ErrorResponder, JsonErrorResponder};
