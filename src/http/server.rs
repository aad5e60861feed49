//! HTTP server implementation.

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::{should_rate_limit, CheckService};
use crate::error::{Result, TripgateError};

/// HTTP server for the rate limit check service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The check service state
    service: CheckService,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, service: CheckService) -> Self {
        Self { addr, service }
    }

    /// Routes served by the check service.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/ratelimit", post(should_rate_limit))
            .route("/healthz", get(|| async { "ok" }))
            .with_state(self.service.clone())
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server for rate limit checks");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TripgateError::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{FailureMode, InMemoryStore, KeyBuilder, PolicyTable, RateLimiter};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use parking_lot::RwLock;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn server() -> HttpServer {
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), FailureMode::Open);
        let service = CheckService::new(
            limiter,
            KeyBuilder::default(),
            Arc::new(RwLock::new(PolicyTable::new())),
        );
        HttpServer::new("127.0.0.1:0".parse().unwrap(), service)
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = server()
            .router()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_check_route_accepts_json() {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/ratelimit")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"resource":"/api/search","client_ip":"1.2.3.4","policy":{"window_ms":1000,"max_count":3}}"#,
            ))
            .unwrap();

        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_check_route_rejects_oversized_inline_window() {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/ratelimit")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"resource":"/api/search","client_ip":"1.2.3.4","policy":{"window_ms":18446744073709551615,"max_count":3}}"#,
            ))
            .unwrap();

        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server().serve_with_shutdown(async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
