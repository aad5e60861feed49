//! axum middleware guarding a route with a rate limit.
//!
//! Each protected route gets its own `RouteGuard`, carrying the policy for
//! that route:
//!
//! ```ignore
//! let search = RouteGuard::new(Guard::new(limiter.clone(), keys.clone(), policy), true);
//! Router::new().route(
//!     "/api/search",
//!     get(search_handler).layer(from_fn_with_state(search, rate_limit)),
//! );
//! ```

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use super::identity::ClientContext;
use crate::ratelimit::{Guard, RateLimitError};

/// State for the `rate_limit` middleware.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    guard: Guard,
    trust_proxy_headers: bool,
}

impl RouteGuard {
    pub fn new(guard: Guard, trust_proxy_headers: bool) -> Self {
        Self {
            guard,
            trust_proxy_headers,
        }
    }
}

/// Rejects the request before it reaches the handler when it is over limit.
pub async fn rate_limit(State(route): State<RouteGuard>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = ClientContext {
        headers: req.headers(),
        peer,
        trust_proxy_headers: route.trust_proxy_headers,
    }
    .client_ip();
    let resource = req.uri().path().to_string();

    match route.guard.admit(client, &resource).await {
        Ok(_) => next.run(req).await,
        Err(RateLimitError::ThresholdExceeded { key, count, max_count }) => {
            // Best effort: the rejection stands even if the TTL lookup fails
            let retry_after = match route.guard.limiter().store().time_to_live(key.as_str()).await {
                Ok(ttl) => ttl,
                Err(err) => {
                    warn!(key = %key, error = %err, "Could not read window TTL");
                    None
                }
            };
            too_many_requests(count, max_count, retry_after)
        }
        Err(RateLimitError::MissingIdentity) => {
            error!(resource = %resource, "No client address available for rate limited route");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "missing_identity",
                "client address is unavailable for a rate limited route",
            )
        }
        Err(RateLimitError::StoreUnavailable(_)) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "rate limit store is unavailable",
        ),
    }
}

fn too_many_requests(
    count: u64,
    max_count: u64,
    retry_after: Option<std::time::Duration>,
) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "code": "rate_limited",
            "message": "too many requests",
            "count": count,
            "limit": max_count,
        })),
    )
        .into_response();

    if let Some(ttl) = retry_after {
        // Round up so clients never retry inside the window
        let secs = ttl.as_millis().div_ceil(1000).max(1);
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "code": code, "message": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{
        CounterStore, FailureMode, InMemoryStore, KeyBuilder, RateLimitPolicy, RateLimiter,
        StoreError,
    };
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct UnreachableStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn increment(&self, _key: &str) -> Result<u64, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Timeout(Duration::from_millis(250)))
        }

        async fn set_expiry(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Timeout(Duration::from_millis(250)))
        }

        async fn increment_with_expiry(&self, _key: &str, _ttl: Duration) -> Result<u64, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Timeout(Duration::from_millis(250)))
        }

        async fn time_to_live(&self, _key: &str) -> Result<Option<Duration>, StoreError> {
            Err(StoreError::Timeout(Duration::from_millis(250)))
        }
    }

    fn app(store: Arc<dyn CounterStore>, failure_mode: FailureMode, max_count: u64) -> Router {
        let limiter = RateLimiter::new(store, failure_mode);
        let policy = RateLimitPolicy::from_millis(1000, max_count).unwrap();
        let route = RouteGuard::new(Guard::new(limiter, KeyBuilder::default(), policy), true);

        Router::new()
            .route(
                "/api/search",
                get(|| async { "results" }).layer(from_fn_with_state(route, rate_limit)),
            )
            .route("/api/open", get(|| async { "open" }))
    }

    fn request(path: &str, ip: Option<&'static str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(path);
        if let Some(ip) = ip {
            builder = builder.header("x-forwarded-for", ip);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_fourth_request_is_rejected() {
        let app = app(Arc::new(InMemoryStore::new()), FailureMode::Open, 3);

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(request("/api/search?q=paris", Some("1.2.3.4")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(request("/api/search?q=rome", Some("1.2.3.4")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");

        // Another client and an unguarded route are unaffected
        let response = app
            .clone()
            .oneshot(request("/api/search", Some("5.6.7.8")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(request("/api/open", Some("1.2.3.4"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_identity_is_a_server_error() {
        let store = Arc::new(UnreachableStore {
            calls: AtomicUsize::new(0),
        });
        let app = app(store.clone(), FailureMode::Open, 3);

        let response = app.oneshot(request("/api/search", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_timeout_fails_open() {
        let store = Arc::new(UnreachableStore {
            calls: AtomicUsize::new(0),
        });
        let app = app(store.clone(), FailureMode::Open, 1);

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(request("/api/search", Some("1.2.3.4")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_store_timeout_fails_closed() {
        let store = Arc::new(UnreachableStore {
            calls: AtomicUsize::new(0),
        });
        let app = app(store, FailureMode::Closed, 1);

        let response = app
            .oneshot(request("/api/search", Some("1.2.3.4")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
