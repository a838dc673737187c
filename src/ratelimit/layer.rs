//! Rate limiting middleware.
//!
//! Every request is counted under the key its [`KeyPolicy`] produces. Quota
//! headers are attached to admitted and rejected responses alike. A request
//! over the limit is answered with `429 Too Many Requests` and never reaches
//! the wrapped service. A store failure is reported through the request's
//! [`ErrorChannel`](crate::errorscheme::ErrorChannel), so the service must
//! sit inside an [`ErrorSchemeLayer`](crate::errorscheme::ErrorSchemeLayer).

use axum::extract::Request;
use axum::http::{header::HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::client_ip::ClientIpResolver;
use super::counter::Counter;
use super::memory::MemoryStore;
use super::policy::{CompositePolicy, KeyPolicy};
use super::redis::{RedisStore, RedisStoreConfig};
use super::store::CounterStore;
use crate::config::{BackendConfig, RateLimitingConfig};
use crate::error::Result;
use crate::errorscheme::{report_error, unwritten, AppError, ErrorChannel};

/// Configured hits per window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Hits left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Seconds until the current window resets.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Message reported when the counter store fails.
pub const STORE_ERROR_MESSAGE: &str = "rate limit error";

struct RateLimitState {
    store: Arc<dyn CounterStore>,
    policy: Arc<dyn KeyPolicy>,
    limit: u64,
}

/// Tower layer for rate limiting.
#[derive(Clone)]
pub struct RateLimitLayer {
    state: Arc<RateLimitState>,
}

impl RateLimitLayer {
    /// Create a layer allowing `limit` hits per window for each key of `policy`.
    pub fn new<C, P>(store: C, policy: P, limit: u64) -> Self
    where
        C: CounterStore + 'static,
        P: KeyPolicy + 'static,
    {
        Self::from_shared(Arc::new(store), Arc::new(policy), limit)
    }

    /// Create a layer from already shared parts.
    pub fn from_shared(store: Arc<dyn CounterStore>, policy: Arc<dyn KeyPolicy>, limit: u64) -> Self {
        Self {
            state: Arc::new(RateLimitState {
                store,
                policy,
                limit,
            }),
        }
    }

    /// Build the store, policy and limit described by `config`.
    ///
    /// Fails on an invalid configuration or an unreachable Redis backend.
    pub async fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        config.validate()?;

        let client_ip = ClientIpResolver::new(&config.trusted_headers)?;
        let policy = CompositePolicy::new(config.key.clone())?.with_client_ip(client_ip);

        let store: Arc<dyn CounterStore> = match &config.backend {
            BackendConfig::Memory => Arc::new(MemoryStore::new(config.window())?),
            BackendConfig::Redis {
                url,
                key_prefix,
                timeout_ms,
            } => {
                let store_config = RedisStoreConfig {
                    window: config.window(),
                    key_prefix: key_prefix.clone(),
                    timeout: std::time::Duration::from_millis(*timeout_ms),
                };
                Arc::new(RedisStore::connect(url, store_config).await?)
            }
        };

        Ok(Self::from_shared(store, Arc::new(policy), config.limit))
    }

    /// Get the configured limit.
    pub fn limit(&self) -> u64 {
        self.state.limit
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: Arc::clone(&self.state),
        }
    }
}

/// Tower service for rate limiting.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: Arc<RateLimitState>,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Response: IntoResponse,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            let key = state.policy.key(&req);

            let counter = match state.store.increment(&key).await {
                Ok(counter) => counter,
                Err(e) => {
                    warn!(key = %key, error = %e, "Rate limit store failed");
                    report_error(
                        &req,
                        AppError::internal_server_error(STORE_ERROR_MESSAGE).with_internal(e),
                    );
                    return Ok(unwritten());
                }
            };

            let headers = quota_headers(state.limit, &counter);

            if counter.exceeds(state.limit) {
                debug!(
                    key = %key,
                    hits = counter.hits,
                    limit = state.limit,
                    reset_in = counter.reset_in,
                    "Rate limit exceeded"
                );

                let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
                response.headers_mut().extend(headers);
                return Ok(response);
            }

            // Recovered panics replace the response
            if let Some(channel) = req.extensions().get::<ErrorChannel>() {
                channel.keep_headers(headers.clone());
            }

            let mut response = inner.call(req).await?.into_response();

            // Headers the handler set itself are left alone
            for (name, value) in headers {
                response.headers_mut().entry(name).or_insert(value);
            }

            Ok(response)
        })
    }
}

/// Quota headers for `counter` under `limit`.
fn quota_headers(limit: u64, counter: &Counter) -> [(HeaderName, HeaderValue); 3] {
    [
        (X_RATELIMIT_LIMIT, HeaderValue::from(limit)),
        (X_RATELIMIT_REMAINING, HeaderValue::from(counter.remaining(limit))),
        (X_RATELIMIT_RESET, HeaderValue::from(counter.reset_in)),
    ]
}
