//! Axum integration for the idempotent request engine.
//!
//! Wrap routes with [`IdempotencyLayer`] and every request passes through
//! [`IdempotencyEngine::handle`](idempotent_request_core::IdempotencyEngine::handle):
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │        IdempotencyLayer (tower)        │  ← body buffering, 413
//! ├────────────────────────────────────────┤
//! │        IdempotencyEngine (core)        │  ← 400 / 409 / 422, replay
//! ├────────────────────────────────────────┤
//! │        Route handler (axum)            │  ← runs once per key
//! └────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use axum::{routing::post, Router};
//! use idempotent_request_core::{IdempotencyConfig, IdempotencyEngine};
//! use idempotent_request_web::IdempotencyLayer;
//!
//! let config = IdempotencyConfig::from_env()?;
//! let engine = IdempotencyEngine::builder()
//!     .config(&config)?
//!     .specification(MySpecification)
//!     .driver(driver)
//!     .build()?;
//!
//! let app = Router::new()
//!     .route("/api/hello", post(hello))
//!     .layer(IdempotencyLayer::new(engine).max_body_bytes(config.max_body_bytes));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod layer;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::IdempotencyKey;
pub use layer::{IdempotencyLayer, IdempotencyMiddleware};
