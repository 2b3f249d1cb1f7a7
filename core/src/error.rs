//! Error taxonomy for the idempotency engine.
//!
//! Client protocol problems (missing key, payload mismatch, lock conflict) are
//! not errors here: the engine answers them with a response value. Only two
//! classes are raised, because neither can be resolved by the engine itself:
//!
//! - [`UnsafeImplementationError`]: the specification produced a storage key
//!   that does not embed the idempotency key.
//! - [`StorageError`]: a driver call failed. The cause is preserved.

use crate::record::StorageKey;
use std::fmt;
use thiserror::Error;

/// Errors raised by [`IdempotencyEngine::handle`](crate::engine::IdempotencyEngine::handle).
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// The server specification is misconfigured.
    #[error(transparent)]
    UnsafeImplementation(#[from] UnsafeImplementationError),

    /// A storage operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The server specification violated a safety requirement.
///
/// This is a programming error in the embedding application, not a client error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsafe implementation: {message}")]
pub struct UnsafeImplementationError {
    message: String,
}

impl UnsafeImplementationError {
    /// Create a new error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The storage key did not contain the idempotency key.
    #[must_use]
    pub fn storage_key_without_idempotency_key() -> Self {
        Self::new("The storage-key must include the value of the `Idempotency-Key` header.")
    }

    /// Human-readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Record store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOperation {
    /// Looking up or creating the record.
    FindOrCreate,
    /// Stamping `locked_at` on an unprocessed record.
    AcquireLock,
    /// Persisting the response and clearing the lock.
    SetResponseAndUnlock,
    /// Rebuilding a stored response for replay.
    ReplayStoredResponse,
}

impl StorageOperation {
    /// Stable name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FindOrCreate => "find_or_create",
            Self::AcquireLock => "acquire_lock",
            Self::SetResponseAndUnlock => "set_response_and_unlock",
            Self::ReplayStoredResponse => "replay_stored_response",
        }
    }
}

impl fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A storage driver call failed during a record store operation.
#[derive(Error, Debug)]
pub struct StorageError {
    operation: StorageOperation,
    storage_key: StorageKey,
    #[source]
    source: DriverError,
}

impl StorageError {
    /// Wrap a driver error with the operation and key it occurred on.
    #[must_use]
    pub const fn new(
        operation: StorageOperation,
        storage_key: StorageKey,
        source: DriverError,
    ) -> Self {
        Self {
            operation,
            storage_key,
            source,
        }
    }

    /// The operation that failed.
    #[must_use]
    pub const fn operation(&self) -> StorageOperation {
        self.operation
    }

    /// The storage key of the affected record.
    #[must_use]
    pub const fn storage_key(&self) -> &StorageKey {
        &self.storage_key
    }

    /// Whether the affected record is known to remain locked.
    ///
    /// No automatic unlock or retry is attempted; an operator must clear it.
    #[must_use]
    pub const fn leaves_record_locked(&self) -> bool {
        matches!(self.operation, StorageOperation::SetResponseAndUnlock)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = &self.storage_key;
        match self.operation {
            StorageOperation::FindOrCreate => {
                write!(f, "Failed to find or create the stored idempotent request: {key}")
            }
            StorageOperation::AcquireLock => {
                write!(f, "Failed to acquire a lock for the stored idempotent request: {key}")
            }
            StorageOperation::SetResponseAndUnlock => write!(
                f,
                "Failed to save the response of an idempotent request: {key}. \
                 The request is left locked; you should unlock the request manually."
            ),
            StorageOperation::ReplayStoredResponse => {
                write!(f, "Failed to replay the stored response of an idempotent request: {key}")
            }
        }
    }
}

/// Errors returned by [`StorageDriver`](crate::storage::StorageDriver) implementations.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The backend rejected or failed the call (connection, query, timeout).
    #[error("Backend error: {0}")]
    Backend(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored record is in a state the record model cannot represent.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

/// Setup-time configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The activation strategy tag is neither `always` nor `opt-in`.
    #[error("Unknown activation strategy: {0:?} (expected \"always\" or \"opt-in\")")]
    UnknownActivationStrategy(String),

    /// A required engine component was not provided to the builder.
    #[error("Missing required component: {0}")]
    MissingComponent(&'static str),

    /// A configured header name is not a valid HTTP header name.
    #[error("Invalid header name: {0:?}")]
    InvalidHeaderName(String),

    /// A numeric setting could not be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Setting name.
        name: &'static str,
        /// Raw value that failed to parse.
        value: String,
    },
}
