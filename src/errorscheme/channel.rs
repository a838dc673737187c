//! Per-request error channel.
//!
//! The error scheme middleware installs a fresh [`ErrorChannel`] in each
//! request's extensions. Code further down the stack reports an [`AppError`]
//! into it and returns an [`unwritten`] response, leaving the rendering to the
//! middleware.

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, Extensions, HeaderMap, HeaderName, HeaderValue, Request};
use axum::response::Response;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::Arc;

use super::error::AppError;

const MISSING_CHANNEL: &str =
    "no ErrorChannel installed for this request; wrap the service with ErrorSchemeLayer";

/// Response extension marking a response no handler has written.
///
/// The error scheme middleware only renders a reported error over responses
/// carrying this marker. Any other response is owned by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unwritten;

/// An empty response that leaves the final say to the error scheme middleware.
pub fn unwritten() -> Response {
    let mut response = Response::new(Body::empty());
    response.extensions_mut().insert(Unwritten);
    response
}

/// Whether `response` lacks the [`Unwritten`] marker.
///
/// The error scheme middleware additionally treats an empty `200` as
/// unwritten while an error is pending, which covers handlers returning `()`.
pub fn is_written(response: &Response) -> bool {
    response.extensions().get::<Unwritten>().is_none()
}

#[derive(Debug, Default)]
struct Slot {
    error: Option<AppError>,
    headers: HeaderMap,
}

/// Slot holding the error reported for one request.
///
/// Cloning yields a handle to the same slot. A later report replaces an
/// earlier one. Layers can also leave headers in the slot that must reach
/// the client even when the response is replaced by a recovered panic.
#[derive(Debug, Clone, Default)]
pub struct ErrorChannel {
    slot: Arc<Mutex<Slot>>,
}

impl ErrorChannel {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the channel installed in `extensions`.
    ///
    /// # Panics
    ///
    /// Panics if no error scheme middleware installed a channel.
    pub fn from_extensions(extensions: &Extensions) -> Self {
        extensions
            .get::<ErrorChannel>()
            .cloned()
            .unwrap_or_else(|| panic!("{}", MISSING_CHANNEL))
    }

    /// Record `err` for this request.
    pub fn set(&self, err: AppError) {
        self.slot.lock().error = Some(err);
    }

    /// Record `err` and return an [`unwritten`] response.
    pub fn report(&self, err: AppError) -> Response {
        self.set(err);
        unwritten()
    }

    /// Whether an error has been recorded.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().error.is_some()
    }

    /// Remove and return the recorded error.
    pub fn take(&self) -> Option<AppError> {
        self.slot.lock().error.take()
    }

    /// Keep `headers` for a response rendered after a panic.
    pub fn keep_headers<I>(&self, headers: I)
    where
        I: IntoIterator<Item = (HeaderName, HeaderValue)>,
    {
        self.slot.lock().headers.extend(headers);
    }

    /// Remove and return the kept headers.
    pub fn take_headers(&self) -> HeaderMap {
        std::mem::take(&mut self.slot.lock().headers)
    }
}

/// Report `err` for the request being handled.
///
/// # Panics
///
/// Panics if the request did not pass through an error scheme middleware.
pub fn report_error<B>(req: &Request<B>, err: AppError) {
    ErrorChannel::from_extensions(req.extensions()).set(err);
}

impl<S> FromRequestParts<S> for ErrorChannel
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_extensions(&parts.extensions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_report_error_sets_slot() {
        let channel = ErrorChannel::new();
        let mut req = Request::new(Body::empty());
        req.extensions_mut().insert(channel.clone());

        report_error(&req, AppError::new(StatusCode::NOT_FOUND, "Not here"));

        let err = channel.take().expect("error should be recorded");
        assert_eq!(err.code, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "Not here");
        assert!(!channel.is_pending());
    }

    #[test]
    fn test_last_report_wins() {
        let channel = ErrorChannel::new();
        channel.set(AppError::new(StatusCode::BAD_REQUEST, "first"));
        channel.set(AppError::new(StatusCode::CONFLICT, "second"));

        assert_eq!(channel.take().unwrap().message, "second");
    }

    #[test]
    #[should_panic(expected = "no ErrorChannel installed")]
    fn test_report_without_channel_panics() {
        let req = Request::new(Body::empty());
        report_error(&req, AppError::internal_server_error("nowhere to go"));
    }

    #[test]
    fn test_report_returns_unwritten_response() {
        let channel = ErrorChannel::new();
        let response = channel.report(AppError::internal_server_error("failed"));

        assert!(!is_written(&response));
        assert!(channel.is_pending());
    }

    #[test]
    fn test_kept_headers_are_taken_once() {
        let channel = ErrorChannel::new();
        channel.keep_headers([(
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(10_u64),
        )]);

        let headers = channel.clone().take_headers();
        assert_eq!(headers["x-ratelimit-limit"], "10");
        assert!(channel.take_headers().is_empty());
    }

    #[test]
    fn test_plain_response_counts_as_written() {
        let response = Response::new(Body::from("hello"));
        assert!(is_written(&response));
    }

    #[tokio::test]
    async fn test_extractor_returns_installed_channel() {
        let channel = ErrorChannel::new();
        let mut req = Request::new(Body::empty());
        req.extensions_mut().insert(channel.clone());
        let (mut parts, _) = req.into_parts();

        let extracted = ErrorChannel::from_request_parts(&mut parts, &()).await.unwrap();
        extracted.set(AppError::internal_server_error("via extractor"));

        assert_eq!(channel.take().unwrap().message, "via extractor");
    }
}
