//! Simple API: one idempotent route.
//!
//! ```text
//! POST /api/hello   {"name": "Edison"}  →  {"message": "Hello, Edison!"}
//! GET  /health      (not idempotent)
//! ```

pub mod config;
pub mod specification;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use config::{Config, StorageBackend, StorageConfig};
use idempotent_request_core::{DriverError, IdempotencyEngine, StorageDriver};
use idempotent_request_postgres::PostgresStorageDriver;
use idempotent_request_redis::RedisStorageDriver;
use idempotent_request_testing::InMemoryStorageDriver;
use idempotent_request_web::{IdempotencyKey, IdempotencyLayer};
use serde::{Deserialize, Serialize};
use specification::SimpleApiSpecification;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Body of `POST /api/hello`.
#[derive(Debug, Deserialize)]
pub struct HelloRequest {
    /// Who to greet
    pub name: String,
}

/// Response of `POST /api/hello`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloResponse {
    /// Greeting
    pub message: String,
}

/// `POST /api/hello`
#[allow(clippy::unused_async)]
pub async fn hello(
    key: Option<IdempotencyKey>,
    Json(request): Json<HelloRequest>,
) -> Json<HelloResponse> {
    tracing::info!(
        idempotency_key = key.as_ref().map(|k| k.0.as_str()),
        name = %request.name,
        "Greeting"
    );
    Json(HelloResponse {
        message: format!("Hello, {}!", request.name),
    })
}

/// `GET /health`
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Build the router. Only `/api/hello` goes through the idempotency layer.
#[must_use]
pub fn app(engine: IdempotencyEngine, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/hello", post(hello))
        .layer(IdempotencyLayer::new(engine).max_body_bytes(max_body_bytes))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
}

/// Connect the configured storage backend.
///
/// # Errors
///
/// Returns [`DriverError`] if the backend cannot be reached or migrated.
pub async fn connect_storage(
    config: &StorageConfig,
) -> Result<Arc<dyn StorageDriver>, DriverError> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; records are lost on restart");
            Ok(Arc::new(InMemoryStorageDriver::new()))
        }
        StorageBackend::Postgres => {
            let driver = PostgresStorageDriver::new(&config.database_url).await?;
            driver.migrate().await?;
            Ok(Arc::new(driver))
        }
        StorageBackend::Redis => {
            let mut driver = RedisStorageDriver::new(&config.redis_url).await?;
            if let Some(ttl) = config.redis_ttl {
                driver = driver.with_ttl(ttl);
            }
            Ok(Arc::new(driver))
        }
    }
}

/// Build the engine from configuration and a connected driver.
///
/// # Errors
///
/// Returns [`idempotent_request_core::ConfigError`] for invalid idempotency settings.
pub fn build_engine(
    config: &Config,
    driver: Arc<dyn StorageDriver>,
) -> Result<IdempotencyEngine, idempotent_request_core::ConfigError> {
    IdempotencyEngine::builder()
        .config(&config.idempotency)?
        .specification(SimpleApiSpecification)
        .shared_driver(driver)
        .build()
}
