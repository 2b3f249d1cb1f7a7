//! Tower layer that runs routes through the idempotency engine.
//!
//! # Example
//!
//! ```ignore
//! use axum::{routing::post, Router};
//! use idempotent_request_web::IdempotencyLayer;
//!
//! let app = Router::new()
//!     .route("/api/hello", post(hello))
//!     .layer(IdempotencyLayer::new(engine));
//! ```
//!
//! # Flow
//!
//! 1. **Buffer** the request body (up to `max_body_bytes`, else 413)
//! 2. **Store** the idempotency key in request extensions for handler access
//! 3. **Hand** the buffered request to [`IdempotencyEngine::handle`]
//! 4. **Buffer** the inner service's response so it can be stored and replayed
//!
//! Engine errors (unsafe specification, storage failures) become a 500 via
//! [`AppError`].

use crate::error::AppError;
use crate::extractors::IdempotencyKey;
use axum::{
    body::{Body, Bytes},
    extract::Request,
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use idempotent_request_core::{config::DEFAULT_MAX_BODY_BYTES, problem, IdempotencyEngine};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Layer wrapping services in [`IdempotencyMiddleware`].
#[derive(Clone, Debug)]
pub struct IdempotencyLayer {
    engine: IdempotencyEngine,
    max_body_bytes: usize,
}

impl IdempotencyLayer {
    /// Create a layer driven by `engine`.
    #[must_use]
    pub const fn new(engine: IdempotencyEngine) -> Self {
        Self {
            engine,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Limit on buffered request bodies; larger requests get 413.
    #[must_use]
    pub const fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}

impl<S> Layer<S> for IdempotencyLayer {
    type Service = IdempotencyMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IdempotencyMiddleware {
            inner,
            engine: self.engine.clone(),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// Middleware service applying idempotency to every request.
#[derive(Clone, Debug)]
pub struct IdempotencyMiddleware<S> {
    inner: S,
    engine: IdempotencyEngine,
    max_body_bytes: usize,
}

impl<S> Service<Request> for IdempotencyMiddleware<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let engine = self.engine.clone();
        let limit = self.max_body_bytes;

        Box::pin(async move {
            Ok(idempotent_call(engine, inner, request, limit)
                .await
                .unwrap_or_else(IntoResponse::into_response))
        })
    }
}

async fn idempotent_call<S>(
    engine: IdempotencyEngine,
    mut inner: S,
    request: Request,
    limit: usize,
) -> Result<Response, AppError>
where
    S: Service<Request, Response = Response, Error = Infallible> + Send,
    S::Future: Send,
{
    let (mut parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, limit).await.map_err(|err| {
        if exceeds_limit(&err) {
            AppError::payload_too_large(format!("Request body exceeds {limit} bytes"))
        } else {
            AppError::bad_request("Failed to read request body").with_source(err.into())
        }
    })?;

    let key = parts
        .headers
        .get(engine.key_header())
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(|value| IdempotencyKey(value.to_string()));
    if let Some(key) = key {
        parts.extensions.insert(key);
    }

    let response = engine
        .handle(http::Request::from_parts(parts, body), |request| async move {
            let response = match inner.call(request.map(Body::from)).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            buffer_response(response).await
        })
        .await?;

    Ok(response.map(Body::from))
}

async fn buffer_response(response: Response) -> http::Response<Bytes> {
    let (parts, body) = response.into_parts();
    match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => http::Response::from_parts(parts, bytes),
        Err(err) => {
            tracing::error!(error = %err, "Failed to buffer handler response");
            problem::handler_failure()
        }
    }
}

fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if current.is::<LengthLimitError>() {
            return true;
        }
        source = current.source();
    }
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Router};
    use idempotent_request_testing::{InMemoryStorageDriver, TestSpecification};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app(driver: &InMemoryStorageDriver, calls: Arc<AtomicUsize>, limit: usize) -> Router {
        let engine = IdempotencyEngine::builder()
            .specification(TestSpecification::new())
            .driver(driver.clone())
            .build()
            .unwrap();

        Router::new()
            .route(
                "/api/hello",
                post(move |body: String| {
                    let calls = Arc::clone(&calls);
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        format!("call {n}: {body}")
                    }
                }),
            )
            .layer(IdempotencyLayer::new(engine).max_body_bytes(limit))
    }

    fn request(key: &str, body: &'static str) -> Request {
        Request::builder()
            .method("POST")
            .uri("/api/hello")
            .header("Idempotency-Key", key)
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_retry_is_replayed() {
        let driver = InMemoryStorageDriver::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(&driver, Arc::clone(&calls), DEFAULT_MAX_BODY_BYTES);
        let key = Uuid::new_v4().to_string();

        let first = app.clone().oneshot(request(&key, "edison")).await.unwrap();
        let second = app.oneshot(request(&key, "edison")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(body_string(first).await, "call 1: edison");
        assert_eq!(body_string(second).await, "call 1: edison");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_bad_request() {
        let driver = InMemoryStorageDriver::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(&driver, Arc::clone(&calls), DEFAULT_MAX_BODY_BYTES);

        let request = Request::builder()
            .method("POST")
            .uri("/api/hello")
            .body(Body::from("edison"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()["content-type"],
            problem::PROBLEM_CONTENT_TYPE
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let driver = InMemoryStorageDriver::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(&driver, Arc::clone(&calls), 4);

        let response = app
            .oneshot(request(&Uuid::new_v4().to_string(), "far too long"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(driver.is_empty());
    }

    #[tokio::test]
    async fn test_unsafe_specification_is_internal_error() {
        let driver = InMemoryStorageDriver::new();
        let engine = IdempotencyEngine::builder()
            .specification(TestSpecification::new().with_unsafe_storage_key())
            .driver(driver.clone())
            .build()
            .unwrap();
        let app = Router::new()
            .route("/api/hello", post(|| async { "unreachable" }))
            .layer(IdempotencyLayer::new(engine));

        let response = app
            .oneshot(request(&Uuid::new_v4().to_string(), "edison"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(driver.is_empty());
    }
}
