//! Response hooks, applied at every exit point of the engine.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::Response;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Default header used by [`StatusHeaderHooks`].
pub const IDEMPOTENCY_STATUS_HEADER: &str = "x-idempotency-status";

/// Situation that produced an outgoing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseSituation {
    /// The handler ran for the first time and returned normally.
    Success,
    /// The idempotency key was absent or invalid (400).
    KeyMissing,
    /// A request with the same key is being processed (409).
    KeyConflict,
    /// The key was reused with a different request (422).
    KeyPayloadMismatch,
    /// A stored response was replayed.
    RetrievedStoredResponse,
    /// The handler failed; an error response was stored in its place.
    Error,
}

impl ResponseSituation {
    /// Tag as reported in the status header.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::KeyMissing => "key_missing",
            Self::KeyConflict => "key_conflict",
            Self::KeyPayloadMismatch => "key_payload_mismatch",
            Self::RetrievedStoredResponse => "retrieved_stored_response",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ResponseSituation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-processing of outgoing responses.
///
/// For [`ResponseSituation::Success`] and [`ResponseSituation::Error`] the
/// hook runs before the response is stored, so the modification is part of
/// what later replays return.
pub trait ResponseHooks: Send + Sync {
    /// Modify `response` before it leaves the engine.
    fn modify_response(
        &self,
        response: Response<Bytes>,
        situation: ResponseSituation,
    ) -> Pin<Box<dyn Future<Output = Response<Bytes>> + Send + '_>>;
}

/// Hooks that return every response unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ResponseHooks for NoopHooks {
    fn modify_response(
        &self,
        response: Response<Bytes>,
        _situation: ResponseSituation,
    ) -> Pin<Box<dyn Future<Output = Response<Bytes>> + Send + '_>> {
        Box::pin(async move { response })
    }
}

/// Hooks that report the situation tag in a response header.
#[derive(Debug, Clone)]
pub struct StatusHeaderHooks {
    header: HeaderName,
}

impl StatusHeaderHooks {
    /// Report the situation in `header`.
    #[must_use]
    pub const fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for StatusHeaderHooks {
    fn default() -> Self {
        Self::new(HeaderName::from_static(IDEMPOTENCY_STATUS_HEADER))
    }
}

impl ResponseHooks for StatusHeaderHooks {
    fn modify_response(
        &self,
        mut response: Response<Bytes>,
        situation: ResponseSituation,
    ) -> Pin<Box<dyn Future<Output = Response<Bytes>> + Send + '_>> {
        response
            .headers_mut()
            .insert(self.header.clone(), HeaderValue::from_static(situation.as_str()));
        Box::pin(async move { response })
    }
}
