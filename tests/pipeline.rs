//! End-to-end tests for an axum router guarded by both layers.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderName, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use tollgate::config::TollgateConfig;
use tollgate::error::{Result, TollgateError};
use tollgate::errorscheme::{
    report_error, unwritten, AppError, ErrorBody, ErrorChannel, ErrorSchemeLayer,
    JsonErrorResponder, PANIC_MESSAGE,
};
use tollgate::ratelimit::{
    CompositePolicy, Counter, CounterStore, KeyComponents, MemoryStore, RateLimitLayer,
    STORE_ERROR_MESSAGE, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};

struct UnavailableStore;

#[async_trait]
impl CounterStore for UnavailableStore {
    async fn increment(&self, _key: &str) -> Result<Counter> {
        Err(TollgateError::Timeout(Duration::from_millis(500)))
    }
}

fn app(rate_limit: RateLimitLayer, dev_mode: bool) -> Router {
    Router::new()
        .route("/", get(|| async { "Chillin" }))
        .route(
            "/fail",
            get(|channel: ErrorChannel| async move {
                channel.report(AppError::new(StatusCode::BAD_REQUEST, "Bad move"))
            }),
        )
        .route(
            "/report",
            get(|req: Request| async move {
                report_error(
                    &req,
                    AppError::internal_server_error("Something broke")
                        .with_internal(anyhow::anyhow!("disk full")),
                );
                unwritten()
            }),
        )
        .route(
            "/override",
            get(|channel: ErrorChannel| async move {
                channel.set(AppError::new(StatusCode::CONFLICT, "ignored"));
                (StatusCode::ACCEPTED, "Handled it")
            }),
        )
        .route(
            "/silent",
            get(|channel: ErrorChannel| async move {
                channel.set(AppError::new(StatusCode::UNPROCESSABLE_ENTITY, "Missing title"));
            }),
        )
        .route(
            "/panic",
            get(|| async {
                if true {
                    panic!("Freakout");
                }
                "unreachable"
            }),
        )
        .layer(rate_limit)
        .layer(ErrorSchemeLayer::with_responder(JsonErrorResponder::new(dev_mode)))
}

fn memory_limiter(limit: u64) -> RateLimitLayer {
    RateLimitLayer::new(
        MemoryStore::new(Duration::from_secs(60)).unwrap(),
        CompositePolicy::per_ip(),
        limit,
    )
}

fn get_from(path: &str, client: &str) -> Request {
    Request::builder()
        .uri(path)
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap()
}

fn header_value(response: &Response, name: HeaderName) -> u64 {
    response.headers()[&name]
        .to_str()
        .unwrap()
        .parse()
        .unwrap()
}

fn remaining(response: &Response) -> u64 {
    header_value(response, X_RATELIMIT_REMAINING)
}

/// Checks limit and remaining exactly. Reset is whole seconds left in a
/// window started moments ago, so it may already have dropped by one.
fn assert_quota(response: &Response, limit: u64, remaining: u64, window_secs: u64) {
    assert_eq!(header_value(response, X_RATELIMIT_LIMIT), limit);
    assert_eq!(header_value(response, X_RATELIMIT_REMAINING), remaining);
    let reset = header_value(response, X_RATELIMIT_RESET);
    assert!(reset + 1 >= window_secs && reset <= window_secs, "reset was {}", reset);
}

async fn error_body(response: Response) -> ErrorBody {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_clients_are_limited_independently() {
    let app = app(memory_limiter(2), false);

    for expected_remaining in [1, 0] {
        let response = app.clone().oneshot(get_from("/", "203.0.113.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_quota(&response, 2, expected_remaining, 60);
    }

    let response = app.clone().oneshot(get_from("/", "203.0.113.7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(remaining(&response), 0);

    let response = app.clone().oneshot(get_from("/", "198.51.100.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(remaining(&response), 1);
}

#[tokio::test]
async fn test_peer_address_used_without_proxy_headers() {
    let app = app(memory_limiter(1), false);

    let from_peer = |port| {
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 10], port))));
        req
    };

    assert_eq!(app.clone().oneshot(from_peer(4000)).await.unwrap().status(), StatusCode::OK);
    // Same IP from another port shares the key
    assert_eq!(
        app.clone().oneshot(from_peer(4001)).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_reported_error_is_rendered_with_quota_headers() {
    let app = app(memory_limiter(10), false);

    let response = app.oneshot(get_from("/fail", "203.0.113.7")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_quota(&response, 10, 9, 60);
    assert_eq!(
        error_body(response).await,
        ErrorBody {
            status: 400,
            message: "Bad move".to_string(),
            details: None,
        }
    );
}

#[tokio::test]
async fn test_internal_cause_only_in_dev_mode() {
    let response = app(memory_limiter(10), false)
        .oneshot(get_from("/report", "203.0.113.7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_body(response).await.details, None);

    let response = app(memory_limiter(10), true)
        .oneshot(get_from("/report", "203.0.113.7"))
        .await
        .unwrap();
    let body = error_body(response).await;
    assert_eq!(body.message, "Something broke");
    assert_eq!(body.details.as_deref(), Some("disk full"));
}

#[tokio::test]
async fn test_reported_error_rendered_when_handler_returns_nothing() {
    let response = app(memory_limiter(10), false)
        .oneshot(get_from("/silent", "203.0.113.7"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_quota(&response, 10, 9, 60);
    let body = error_body(response).await;
    assert_eq!(body.status, 422);
    assert_eq!(body.message, "Missing title");
}

#[tokio::test]
async fn test_written_response_overrides_reported_error() {
    let response = app(memory_limiter(10), false)
        .oneshot(get_from("/override", "203.0.113.7"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"Handled it");
}

#[tokio::test]
async fn test_panic_is_recovered_and_service_keeps_serving() {
    let app = app(memory_limiter(10), true);

    let response = app.clone().oneshot(get_from("/panic", "203.0.113.7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_quota(&response, 10, 9, 60);
    let body = error_body(response).await;
    assert_eq!(body.message, PANIC_MESSAGE);
    assert_eq!(body.details.as_deref(), Some("Freakout"));

    let response = app.clone().oneshot(get_from("/", "203.0.113.7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // The panicking request was counted before the handler ran
    assert_eq!(remaining(&response), 8);
}

#[tokio::test]
async fn test_store_failure_becomes_500_and_skips_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = Arc::clone(&calls);

    let limiter = RateLimitLayer::new(UnavailableStore, CompositePolicy::per_ip(), 10);
    let app = Router::new()
        .route(
            "/",
            get(move || {
                handler_calls.fetch_add(1, Ordering::SeqCst);
                async { "Chillin" }
            }),
        )
        .layer(limiter)
        .layer(ErrorSchemeLayer::with_responder(JsonErrorResponder::new(true)));

    let response = app.oneshot(get_from("/", "203.0.113.7")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(X_RATELIMIT_REMAINING).is_none());
    let body = error_body(response).await;
    assert_eq!(body.message, STORE_ERROR_MESSAGE);
    assert_eq!(
        body.details.as_deref(),
        Some("Counter store timed out after 500ms")
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_limiter_built_from_yaml_config() {
    let yaml = r#"
rate_limiting:
  limit: 1
  window_secs: 30
  key:
    ip: false
    path: true
"#;
    let config = TollgateConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.rate_limiting.key, KeyComponents::path());

    let app = app(
        RateLimitLayer::from_config(&config.rate_limiting).await.unwrap(),
        false,
    );

    let response = app.clone().oneshot(get_from("/", "203.0.113.7")).await.unwrap();
    assert_quota(&response, 1, 0, 30);

    // Keyed on path, so a different client on the same path is rejected
    let response = app.clone().oneshot(get_from("/", "198.51.100.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = app.clone().oneshot(get_from("/fail", "198.51.100.4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
