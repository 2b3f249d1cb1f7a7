//! Walk through the Edison example against the in-memory backend.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code

use axum::{body::Body, extract::Request, http::StatusCode, response::Response};
use idempotent_request_core::{IdempotencyConfig, IdempotencyEngine};
use idempotent_request_testing::InMemoryStorageDriver;
use simple_api::specification::SimpleApiSpecification;
use simple_api::HelloResponse;
use tower::ServiceExt;

fn app(driver: &InMemoryStorageDriver) -> axum::Router {
    let config = IdempotencyConfig {
        status_header: Some("X-Idempotency-Status".to_string()),
        ..IdempotencyConfig::default()
    };
    let engine = IdempotencyEngine::builder()
        .config(&config)
        .unwrap()
        .specification(SimpleApiSpecification)
        .driver(driver.clone())
        .build()
        .unwrap();
    simple_api::app(engine, config.max_body_bytes)
}

fn hello(key: Option<&str>, name: &str) -> Request {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/hello")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder
        .body(Body::from(format!(r#"{{"name":"{name}"}}"#)))
        .unwrap()
}

async fn greeting(response: Response) -> HelloResponse {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_edison_then_evil() {
    let driver = InMemoryStorageDriver::new();
    let app = app(&driver);
    let key = "8e03978e-40d5-43e8-bc93-6894a57f9324";

    let first = app.clone().oneshot(hello(Some(key), "Edison")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-idempotency-status"], "success");
    assert_eq!(greeting(first).await.message, "Hello, Edison!");

    let retry = app.clone().oneshot(hello(Some(key), "Edison")).await.unwrap();
    assert_eq!(retry.status(), StatusCode::OK);
    assert_eq!(retry.headers()["x-idempotency-status"], "retrieved_stored_response");
    assert_eq!(greeting(retry).await.message, "Hello, Edison!");

    let evil = app.oneshot(hello(Some(key), "Evil")).await.unwrap();
    assert_eq!(evil.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let record = driver.record(&format!("/api/hello-{key}")).unwrap();
    assert_eq!(record.response().unwrap().status, 200);
}

#[tokio::test]
async fn test_hello_requires_a_uuid_key() {
    let driver = InMemoryStorageDriver::new();

    let missing = app(&driver).oneshot(hello(None, "Edison")).await.unwrap();
    let malformed = app(&driver).oneshot(hello(Some("order-42"), "Edison")).await.unwrap();

    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    assert!(driver.is_empty());
}

#[tokio::test]
async fn test_health_is_not_idempotent() {
    let driver = InMemoryStorageDriver::new();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let response = app(&driver).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(driver.is_empty());
}
