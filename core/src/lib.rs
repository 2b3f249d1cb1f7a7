//! # Idempotent Request Core
//!
//! At-most-once processing of mutating requests retried under the same
//! client-supplied `Idempotency-Key`.
//!
//! The engine sits in front of an arbitrary handler and an arbitrary
//! persistence backend. For each request it decides whether to execute the
//! handler, replay a previously captured response, or reject the request,
//! and it never lets two executions of the same logical operation run to
//! completion concurrently.
//!
//! ## Components
//!
//! - [`strategy`]: whether idempotency handling applies to a request
//! - [`identity`]: comparable request identity (method, path, key, fingerprint)
//! - [`record`]: stored record states (unprocessed, processing, processed)
//! - [`storage`]: driver contract and the record store orchestrating it
//! - [`engine`]: the coordination state machine
//! - [`hooks`]: post-processing of outgoing responses
//!
//! ## Collaborators
//!
//! The embedding application provides a [`ServerSpecification`] (key rules,
//! fingerprinting, storage key) and a [`StorageDriver`]. Framework adapters
//! hand the engine a buffered `http::Request<Bytes>`.
//!
//! ## Example
//!
//! ```ignore
//! use idempotent_request_core::{IdempotencyEngine, ActivationStrategy};
//!
//! let engine = IdempotencyEngine::builder()
//!     .activation(ActivationStrategy::OptIn)
//!     .specification(MySpecification)
//!     .driver(MyDriver::new())
//!     .build()?;
//!
//! let response = engine
//!     .handle(request, |request| async move { my_handler(request).await })
//!     .await?;
//! ```
//!
//! ## Limitations
//!
//! Exactly-once execution across crashes requires a driver with atomic
//! insert-if-absent. A lock left behind by a crashed execution is never
//! cleared by the engine; retries observe it as a conflict (409) until an
//! operator or a backend TTL removes it.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod identity;
pub mod problem;
pub mod record;
pub mod response;
pub mod specification;
pub mod storage;
pub mod strategy;

// Re-export key types for convenience
pub use clock::{Clock, SystemClock};
pub use config::IdempotencyConfig;
pub use engine::{IdempotencyEngine, IdempotencyEngineBuilder, IDEMPOTENCY_KEY_HEADER};
pub use error::{
    ConfigError, DriverError, IdempotencyError, StorageError, StorageOperation,
    UnsafeImplementationError,
};
pub use hooks::{
    NoopHooks, ResponseHooks, ResponseSituation, StatusHeaderHooks, IDEMPOTENCY_STATUS_HEADER,
};
pub use identity::{Fingerprint, RequestIdentity};
pub use record::{
    IdempotentRecord, ProcessedRecord, ProcessingRecord, StorageKey, UnprocessedRecord,
};
pub use response::{BodyEncoding, SerializedResponse};
pub use specification::ServerSpecification;
pub use storage::{FindOrCreate, RecordStore, StorageDriver};
pub use strategy::{ActivationPredicate, ActivationStrategy};
