//! The idempotency coordination engine.
//!
//! # Flow
//!
//! ```text
//! activation ──false──▶ handler (no idempotency)
//!     │true
//!     ▼
//! key check ──invalid──▶ 400 key_missing
//!     │
//!     ▼
//! storage key + identity ──key not embedded──▶ UnsafeImplementationError
//!     │
//!     ▼
//! find or create ──found──▶ identity differs? ──▶ 422 key_payload_mismatch
//!     │                     processing?       ──▶ 409 key_conflict
//!     │                     processed?        ──▶ replay stored response
//!     │created              unprocessed       ──┐
//!     ▼                                         │
//! acquire lock ◀────────────────────────────────┘
//!     │
//!     ▼
//! handler (exactly once) ──▶ set response and unlock ──▶ success
//! ```
//!
//! The engine holds no in-process lock. Mutual exclusion between concurrent
//! requests for the same storage key comes entirely from the stored record.

use crate::clock::{Clock, SystemClock};
use crate::config::IdempotencyConfig;
use crate::error::{
    ConfigError, IdempotencyError, StorageError, StorageOperation, UnsafeImplementationError,
};
use crate::hooks::{NoopHooks, ResponseHooks, ResponseSituation, StatusHeaderHooks};
use crate::identity::RequestIdentity;
use crate::problem;
use crate::record::{IdempotentRecord, StorageKey, UnprocessedRecord};
use crate::response::SerializedResponse;
use crate::specification::ServerSpecification;
use crate::storage::{FindOrCreate, RecordStore, StorageDriver};
use crate::strategy::ActivationStrategy;
use bytes::Bytes;
use futures::FutureExt;
use http::header::HeaderName;
use http::{Request, Response};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// Default request header carrying the idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Outcome of looking up an existing record.
enum Retry {
    Reject(Response<Bytes>, ResponseSituation),
    Replay(Response<Bytes>),
    Resume(UnprocessedRecord),
}

/// Coordinates idempotent request handling over a record store.
///
/// Cheap to clone; all components are shared.
#[derive(Clone)]
pub struct IdempotencyEngine {
    activation: ActivationStrategy,
    specification: Arc<dyn ServerSpecification>,
    store: RecordStore,
    hooks: Arc<dyn ResponseHooks>,
    key_header: HeaderName,
}

impl IdempotencyEngine {
    /// Start building an engine.
    #[must_use]
    pub fn builder() -> IdempotencyEngineBuilder {
        IdempotencyEngineBuilder::default()
    }

    /// Header the idempotency key is read from.
    #[must_use]
    pub const fn key_header(&self) -> &HeaderName {
        &self.key_header
    }

    /// Handle `request`, invoking `handler` at most once per logical operation.
    ///
    /// Client protocol errors are returned as `Ok` responses (400, 409, 422).
    /// If `handler` panics, a 500 problem response is stored for the key, the
    /// lock is released, and the panic is then resumed.
    ///
    /// # Errors
    ///
    /// - [`IdempotencyError::UnsafeImplementation`] if the specification's
    ///   storage key does not embed the idempotency key.
    /// - [`IdempotencyError::Storage`] if a storage operation fails. When
    ///   storing the response fails, the record is left locked.
    ///
    /// Only one outcome can propagate. If `handler` panics and storing its
    /// error response also fails, the storage error is logged and counted
    /// but not returned; the panic is resumed instead.
    pub async fn handle<H, Fut>(
        &self,
        request: Request<Bytes>,
        handler: H,
    ) -> Result<Response<Bytes>, IdempotencyError>
    where
        H: FnOnce(Request<Bytes>) -> Fut,
        Fut: Future<Output = Response<Bytes>>,
    {
        if !self.activation.decide(&self.key_header, &request).await {
            tracing::trace!("Idempotency handling not active for request");
            return Ok(handler(request).await);
        }

        let span = tracing::info_span!(
            "idempotent_request",
            method = %request.method(),
            path = %request.uri().path(),
        );
        self.handle_active(request, handler).instrument(span).await
    }

    async fn handle_active<H, Fut>(
        &self,
        request: Request<Bytes>,
        handler: H,
    ) -> Result<Response<Bytes>, IdempotencyError>
    where
        H: FnOnce(Request<Bytes>) -> Fut,
        Fut: Future<Output = Response<Bytes>>,
    {
        let Some(idempotency_key) = self.valid_key(&request) else {
            tracing::warn!("Idempotency-Key is missing or invalid");
            return Ok(self.finish(problem::key_missing(), ResponseSituation::KeyMissing).await);
        };

        let storage_key = self.specification.storage_key(&idempotency_key, &request).await;
        if !storage_key.embeds(&idempotency_key) {
            tracing::error!(
                storage_key = %storage_key,
                "Storage key does not embed the idempotency key"
            );
            return Err(UnsafeImplementationError::storage_key_without_idempotency_key().into());
        }

        let identity =
            RequestIdentity::derive(self.specification.as_ref(), &idempotency_key, &request).await;

        let unprocessed = match self
            .store
            .find_or_create(identity.clone(), storage_key.clone())
            .await
            .inspect_err(record_storage_error)?
        {
            FindOrCreate::Created(record) => record,
            FindOrCreate::Found(existing) => match Self::check_retry(&identity, existing)? {
                Retry::Reject(response, situation) => {
                    return Ok(self.finish(response, situation).await);
                }
                Retry::Replay(response) => {
                    tracing::info!(storage_key = %storage_key, "Replaying stored response");
                    return Ok(self
                        .finish(response, ResponseSituation::RetrievedStoredResponse)
                        .await);
                }
                Retry::Resume(record) => {
                    tracing::info!(
                        storage_key = %storage_key,
                        "Resuming request that never acquired a lock"
                    );
                    record
                }
            },
        };

        let locked = self
            .store
            .acquire_lock(unprocessed)
            .await
            .inspect_err(record_storage_error)?;

        // Everything from here on must reach set_response_and_unlock, or the
        // key stays locked forever.
        let outcome = AssertUnwindSafe(handler(request)).catch_unwind().await;
        let (response, situation, panic) = match outcome {
            Ok(response) => (response, ResponseSituation::Success, None),
            Err(payload) => {
                tracing::error!(
                    storage_key = %storage_key,
                    "Handler panicked, storing error response"
                );
                (problem::handler_failure(), ResponseSituation::Error, Some(payload))
            }
        };

        let response = self.hooks.modify_response(response, situation).await;
        let stored = self
            .store
            .set_response_and_unlock(locked, SerializedResponse::capture(&response))
            .await
            .inspect_err(record_storage_error);

        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        stored?;

        tracing::info!(
            storage_key = %storage_key,
            status = response.status().as_u16(),
            "Processed idempotent request"
        );
        metrics::counter!("idempotency.requests", "situation" => situation.as_str()).increment(1);
        Ok(response)
    }

    /// Decide what to do with a record that already existed.
    fn check_retry(
        identity: &RequestIdentity,
        existing: IdempotentRecord,
    ) -> Result<Retry, StorageError> {
        if !existing.identity().is_identical(identity) {
            tracing::warn!(
                storage_key = %existing.storage_key(),
                "Idempotency-Key reused with a different request"
            );
            return Ok(Retry::Reject(
                problem::key_payload_mismatch(),
                ResponseSituation::KeyPayloadMismatch,
            ));
        }

        match existing {
            IdempotentRecord::Processing(record) => {
                tracing::warn!(
                    storage_key = %record.storage_key(),
                    locked_at = %record.locked_at(),
                    "Request with the same Idempotency-Key is outstanding"
                );
                Ok(Retry::Reject(problem::key_conflict(), ResponseSituation::KeyConflict))
            }
            IdempotentRecord::Processed(record) => {
                let response = record
                    .response()
                    .to_response()
                    .map_err(|e| replay_error(record.storage_key(), &e))
                    .inspect_err(record_storage_error)?;
                Ok(Retry::Replay(response))
            }
            IdempotentRecord::Unprocessed(record) => Ok(Retry::Resume(record)),
        }
    }

    /// Extract a key that is present, non-empty and accepted by the specification.
    fn valid_key(&self, request: &Request<Bytes>) -> Option<String> {
        request
            .headers()
            .get(&self.key_header)
            .and_then(|value| value.to_str().ok())
            .filter(|key| !key.is_empty() && self.specification.satisfies_key_spec(key))
            .map(str::to_string)
    }

    async fn finish(
        &self,
        response: Response<Bytes>,
        situation: ResponseSituation,
    ) -> Response<Bytes> {
        metrics::counter!("idempotency.requests", "situation" => situation.as_str()).increment(1);
        self.hooks.modify_response(response, situation).await
    }
}

impl std::fmt::Debug for IdempotencyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyEngine")
            .field("activation", &self.activation)
            .field("key_header", &self.key_header)
            .finish_non_exhaustive()
    }
}

fn replay_error(
    storage_key: &StorageKey,
    error: &crate::response::ResponseDecodeError,
) -> StorageError {
    StorageError::new(
        StorageOperation::ReplayStoredResponse,
        storage_key.clone(),
        crate::error::DriverError::CorruptRecord(error.to_string()),
    )
}

fn record_storage_error(error: &StorageError) {
    if error.leaves_record_locked() {
        tracing::error!(
            storage_key = %error.storage_key(),
            operation = %error.operation(),
            error = %error,
            "Storage failure left the idempotent request locked"
        );
    } else {
        tracing::error!(
            storage_key = %error.storage_key(),
            operation = %error.operation(),
            error = %error,
            "Storage failure"
        );
    }
    metrics::counter!(
        "idempotency.storage_errors",
        "operation" => error.operation().as_str()
    )
    .increment(1);
}

/// Builder for [`IdempotencyEngine`].
///
/// The specification and the storage driver are required.
#[derive(Default)]
pub struct IdempotencyEngineBuilder {
    activation: ActivationStrategy,
    specification: Option<Arc<dyn ServerSpecification>>,
    driver: Option<Arc<dyn StorageDriver>>,
    hooks: Option<Arc<dyn ResponseHooks>>,
    clock: Option<Arc<dyn Clock>>,
    key_header: Option<HeaderName>,
}

impl IdempotencyEngineBuilder {
    /// Apply settings from `config`: activation strategy, key header, and
    /// the status header hook when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the strategy tag or a header name is invalid.
    pub fn config(mut self, config: &IdempotencyConfig) -> Result<Self, ConfigError> {
        self.activation = config.activation_strategy()?;
        self.key_header = Some(config.key_header_name()?);
        if let Some(header) = config.status_header_name()? {
            self.hooks = Some(Arc::new(StatusHeaderHooks::new(header)));
        }
        Ok(self)
    }

    /// Set the activation strategy.
    #[must_use]
    pub fn activation(mut self, activation: ActivationStrategy) -> Self {
        self.activation = activation;
        self
    }

    /// Set the server specification.
    #[must_use]
    pub fn specification(mut self, specification: impl ServerSpecification + 'static) -> Self {
        self.specification = Some(Arc::new(specification));
        self
    }

    /// Set the storage driver.
    #[must_use]
    pub fn driver(mut self, driver: impl StorageDriver + 'static) -> Self {
        self.driver = Some(Arc::new(driver));
        self
    }

    /// Set a shared storage driver.
    #[must_use]
    pub fn shared_driver(mut self, driver: Arc<dyn StorageDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Set the response hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: impl ResponseHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Set the clock used for lock timestamps.
    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Read the idempotency key from `header` instead of `Idempotency-Key`.
    #[must_use]
    pub fn key_header(mut self, header: HeaderName) -> Self {
        self.key_header = Some(header);
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingComponent`] if no specification or no
    /// storage driver was provided.
    pub fn build(self) -> Result<IdempotencyEngine, ConfigError> {
        let specification = self
            .specification
            .ok_or(ConfigError::MissingComponent("specification"))?;
        let driver = self.driver.ok_or(ConfigError::MissingComponent("storage driver"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        Ok(IdempotencyEngine {
            activation: self.activation,
            specification,
            store: RecordStore::new(driver, clock),
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoopHooks)),
            key_header: self
                .key_header
                .unwrap_or_else(|| HeaderName::from_static(IDEMPOTENCY_KEY_HEADER)),
        })
    }
}
