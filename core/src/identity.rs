//! Request identity: what makes two requests "the same operation".
//!
//! A retried request must match the stored identity field for field. A
//! mismatch means the client reused an idempotency key for a different
//! payload, which is answered with 422.

use crate::specification::ServerSpecification;
use bytes::Bytes;
use http::Request;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Digest of request content used to detect key reuse across payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a digest string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The digest as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Comparable identity of an idempotent request.
///
/// Equality is exact over all four fields. A `None` fingerprint only equals
/// another `None` fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    method: String,
    path: String,
    idempotency_key: String,
    fingerprint: Option<Fingerprint>,
}

impl RequestIdentity {
    /// Build an identity from its parts.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        idempotency_key: impl Into<String>,
        fingerprint: Option<Fingerprint>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            idempotency_key: idempotency_key.into(),
            fingerprint,
        }
    }

    /// Derive the identity of `request`.
    ///
    /// Method and path are read from the request; the fingerprint comes from
    /// the specification and may be `None` when the specification opts out
    /// of payload-mismatch detection.
    pub async fn derive<S>(
        specification: &S,
        idempotency_key: &str,
        request: &Request<Bytes>,
    ) -> Self
    where
        S: ServerSpecification + ?Sized,
    {
        let fingerprint = specification.fingerprint(request).await;
        Self::new(
            request.method().as_str(),
            request.uri().path(),
            idempotency_key,
            fingerprint,
        )
    }

    /// Whether `other` denotes the same logical request.
    #[must_use]
    pub fn is_identical(&self, other: &Self) -> bool {
        self == other
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path, without query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Client-supplied idempotency key.
    #[must_use]
    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    /// Payload fingerprint, if the specification computes one.
    #[must_use]
    pub const fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base() -> RequestIdentity {
        RequestIdentity::new("POST", "/api/hello", "key-1", Some(Fingerprint::new("abc")))
    }

    #[test]
    fn test_identical_requests() {
        assert!(base().is_identical(&base()));
    }

    #[test]
    fn test_method_differs() {
        let other =
            RequestIdentity::new("PUT", "/api/hello", "key-1", Some(Fingerprint::new("abc")));
        assert!(!base().is_identical(&other));
    }

    #[test]
    fn test_path_differs() {
        let other =
            RequestIdentity::new("POST", "/api/bye", "key-1", Some(Fingerprint::new("abc")));
        assert!(!base().is_identical(&other));
    }

    #[test]
    fn test_key_differs() {
        let other =
            RequestIdentity::new("POST", "/api/hello", "key-2", Some(Fingerprint::new("abc")));
        assert!(!base().is_identical(&other));
    }

    #[test]
    fn test_fingerprint_differs() {
        let other =
            RequestIdentity::new("POST", "/api/hello", "key-1", Some(Fingerprint::new("xyz")));
        assert!(!base().is_identical(&other));
    }

    #[test]
    fn test_null_fingerprints_are_equal() {
        let a = RequestIdentity::new("POST", "/api/hello", "key-1", None);
        let b = RequestIdentity::new("POST", "/api/hello", "key-1", None);
        assert!(a.is_identical(&b));
    }

    #[test]
    fn test_null_fingerprint_never_equals_present_one() {
        let none = RequestIdentity::new("POST", "/api/hello", "key-1", None);
        assert!(!none.is_identical(&base()));
        assert!(!base().is_identical(&none));
    }

    proptest! {
        #[test]
        fn prop_identity_equality_is_fieldwise(
            method in "[A-Z]{3,6}",
            path in "/[a-z/]{0,12}",
            key in "[a-z0-9-]{1,36}",
            fp in proptest::option::of("[0-9a-f]{8}"),
            other_fp in proptest::option::of("[0-9a-f]{8}"),
        ) {
            let a = RequestIdentity::new(&method, &path, &key, fp.clone().map(Fingerprint::new));
            let b = RequestIdentity::new(
                &method,
                &path,
                &key,
                other_fp.clone().map(Fingerprint::new),
            );
            prop_assert_eq!(a.is_identical(&b), fp == other_fp);
            prop_assert_eq!(a.is_identical(&b), b.is_identical(&a));
        }
    }
}
