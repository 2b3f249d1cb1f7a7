//! Server specification for tests.
//!
//! - Idempotency-Key format: UUID v4
//! - Fingerprint: SHA-256 over method, URI, headers and body
//! - Storage key: `{method}-{uri}-{key}`
//!
//! Not suitable for production use.

use bytes::Bytes;
use http::Request;
use idempotent_request_core::{Fingerprint, ServerSpecification, StorageKey};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// Test server specification.
#[derive(Debug, Clone)]
pub struct TestSpecification {
    fingerprints: bool,
    embed_key: bool,
}

impl Default for TestSpecification {
    fn default() -> Self {
        Self::new()
    }
}

impl TestSpecification {
    /// Specification with fingerprinting and a safe storage key.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fingerprints: true,
            embed_key: true,
        }
    }

    /// Return `None` fingerprints, disabling payload-mismatch detection.
    #[must_use]
    pub const fn without_fingerprint(mut self) -> Self {
        self.fingerprints = false;
        self
    }

    /// Produce storage keys that do NOT embed the idempotency key.
    ///
    /// Used to exercise the unsafe-implementation check.
    #[must_use]
    pub const fn with_unsafe_storage_key(mut self) -> Self {
        self.embed_key = false;
        self
    }
}

/// Hex-encoded SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn digest_request(request: &Request<Bytes>) -> String {
    let headers: BTreeMap<&str, String> = request
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let digest_base = serde_json::json!({
        "body": String::from_utf8_lossy(request.body()),
        "headers": headers,
        "method": request.method().as_str(),
        "url": request.uri().to_string(),
    });

    sha256_hex(digest_base.to_string().as_bytes())
}

impl ServerSpecification for TestSpecification {
    fn satisfies_key_spec(&self, idempotency_key: &str) -> bool {
        Uuid::parse_str(idempotency_key).is_ok_and(|uuid| uuid.get_version_num() == 4)
    }

    fn fingerprint<'a>(
        &'a self,
        request: &'a Request<Bytes>,
    ) -> Pin<Box<dyn Future<Output = Option<Fingerprint>> + Send + 'a>> {
        let fingerprint = self.fingerprints.then(|| Fingerprint::new(digest_request(request)));
        Box::pin(async move { fingerprint })
    }

    fn storage_key<'a>(
        &'a self,
        idempotency_key: &'a str,
        request: &'a Request<Bytes>,
    ) -> Pin<Box<dyn Future<Output = StorageKey> + Send + 'a>> {
        let key = if self.embed_key {
            format!("{}-{}-{idempotency_key}", request.method(), request.uri())
        } else {
            format!("{}-{}", request.method(), request.uri())
        };
        Box::pin(async move { StorageKey::new(key) })
    }
}
