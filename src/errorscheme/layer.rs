//! Centralized error reporting middleware.

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::http::{header::CONTENT_LENGTH, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, error};

use super::channel::{ErrorChannel, Unwritten};
use super::error::AppError;
use super::responder::{ErrorResponder, JsonErrorResponder};
use crate::config::ErrorSchemeConfig;

/// Message rendered for a recovered panic.
pub const PANIC_MESSAGE: &str = "Internal server error";

/// Tower layer installing an [`ErrorChannel`] and panic recovery.
///
/// After the wrapped service returns:
/// - a panic is rendered as a `500` with the panic payload as internal cause,
///   carrying the headers inner layers kept in the [`ErrorChannel`];
/// - a reported error is rendered only if the response is [`Unwritten`] or an
///   empty `200`, which is what a handler returning `()` produces;
/// - a handler-written response is passed through untouched, and any reported
///   error is dropped.
#[derive(Clone)]
pub struct ErrorSchemeLayer {
    responder: Arc<dyn ErrorResponder>,
}

impl ErrorSchemeLayer {
    /// Create a layer with the JSON responder, reading developer mode from
    /// the default environment variable.
    pub fn new() -> Self {
        Self::with_responder(JsonErrorResponder::from_env())
    }

    /// Create a layer with the JSON responder configured by `config`.
    pub fn from_config(config: &ErrorSchemeConfig) -> Self {
        Self::with_responder(JsonErrorResponder::from_config(config))
    }

    /// Create a layer rendering errors with `responder`.
    pub fn with_responder<R>(responder: R) -> Self
    where
        R: ErrorResponder + 'static,
    {
        Self {
            responder: Arc::new(responder),
        }
    }
}

impl Default for ErrorSchemeLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for ErrorSchemeLayer {
    type Service = ErrorSchemeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ErrorSchemeService {
            inner,
            responder: Arc::clone(&self.responder),
        }
    }
}

/// Tower service produced by [`ErrorSchemeLayer`].
#[derive(Clone)]
pub struct ErrorSchemeService<S> {
    inner: S,
    responder: Arc<dyn ErrorResponder>,
}

impl<S> Service<Request> for ErrorSchemeService<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Response: IntoResponse,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let channel = ErrorChannel::new();
        req.extensions_mut().insert(channel.clone());

        // Use the instance that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let responder = Arc::clone(&self.responder);

        let method = req.method().clone();
        let path = req.uri().path().to_string();

        Box::pin(async move {
            let outcome = AssertUnwindSafe(async move { inner.call(req).await })
                .catch_unwind()
                .await;

            match outcome {
                Err(payload) => {
                    let cause = panic_message(payload.as_ref());
                    error!(
                        method = %method,
                        path = %path,
                        panic = %cause,
                        "Recovered panic in request handler"
                    );

                    let err = AppError::internal_server_error(PANIC_MESSAGE)
                        .with_internal(anyhow::Error::msg(cause));
                    Ok(merge_headers(channel.take_headers(), responder.respond(&err)))
                }
                Ok(Err(e)) => Err(e),
                Ok(Ok(response)) => Ok(finish(
                    response.into_response(),
                    channel.take(),
                    responder.as_ref(),
                )),
            }
        })
    }
}

/// Decide the final response once the wrapped service has returned.
fn finish(
    response: Response,
    pending: Option<AppError>,
    responder: &dyn ErrorResponder,
) -> Response {
    if !is_unwritten(&response, pending.is_some()) {
        if let Some(err) = pending {
            debug!(
                status = %response.status(),
                error = %err,
                "Handler wrote its own response, discarding reported error"
            );
        }
        return response;
    }

    let (mut parts, _) = response.into_parts();
    parts.extensions.remove::<Unwritten>();

    let Some(err) = pending else {
        return Response::from_parts(parts, Body::empty());
    };

    debug!(
        status = %err.code,
        error = %err,
        "Rendering reported error"
    );

    merge_headers(parts.headers, responder.respond(&err))
}

/// Whether the middleware owns the final response.
fn is_unwritten(response: &Response, error_pending: bool) -> bool {
    if response.extensions().get::<Unwritten>().is_some() {
        return true;
    }

    error_pending
        && response.status() == StatusCode::OK
        && response.body().size_hint().exact() == Some(0)
}

/// Put `headers` under the rendered response. The responder's own headers
/// take precedence.
fn merge_headers(mut headers: HeaderMap, mut rendered: Response) -> Response {
    // Framing of the replaced body does not apply to the rendered one
    headers.remove(CONTENT_LENGTH);
    headers.extend(std::mem::take(rendered.headers_mut()));
    *rendered.headers_mut() = headers;
    rendered
}

/// Best-effort string form of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
