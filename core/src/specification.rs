//! Server specification: key validation, fingerprinting, storage addressing.
//!
//! The specification is supplied by the embedding application. It decides
//! what a valid idempotency key looks like, which parts of a request count
//! towards its fingerprint, and under which storage key the record lives.

use crate::identity::Fingerprint;
use crate::record::StorageKey;
use bytes::Bytes;
use http::Request;
use std::future::Future;
use std::pin::Pin;

/// Server-defined rules for idempotency keys and request identity.
///
/// # Storage key safety
///
/// [`storage_key`](Self::storage_key) MUST embed the idempotency key. Keys
/// that are not scoped by the client token allow one client's retry to
/// replay another client's response. The engine checks this on every request
/// and fails with
/// [`UnsafeImplementationError`](crate::error::UnsafeImplementationError)
/// when it is violated.
///
/// # Dyn Compatibility
///
/// Async methods return `Pin<Box<dyn Future>>` so the specification can be
/// held as `Arc<dyn ServerSpecification>`.
pub trait ServerSpecification: Send + Sync {
    /// Whether `idempotency_key` has the server-required shape.
    ///
    /// Keys failing this check are answered with 400.
    fn satisfies_key_spec(&self, idempotency_key: &str) -> bool;

    /// Fingerprint of the request payload.
    ///
    /// Return `None` to opt out of payload-mismatch detection.
    fn fingerprint<'a>(
        &'a self,
        request: &'a Request<Bytes>,
    ) -> Pin<Box<dyn Future<Output = Option<Fingerprint>> + Send + 'a>>;

    /// Key under which the record for this request is stored.
    ///
    /// If there are no special considerations, return the idempotency key itself.
    fn storage_key<'a>(
        &'a self,
        idempotency_key: &'a str,
        request: &'a Request<Bytes>,
    ) -> Pin<Box<dyn Future<Output = StorageKey> + Send + 'a>>;
}
