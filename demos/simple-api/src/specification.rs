//! Server specification for the simple API.
//!
//! - Idempotency-Key format: any UUID
//! - Fingerprint: SHA-256 hex of the request body
//! - Storage key: `{path}-{key}`

use bytes::Bytes;
use http::Request;
use idempotent_request_core::{Fingerprint, ServerSpecification, StorageKey};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// Specification used by every route of the simple API.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleApiSpecification;

impl ServerSpecification for SimpleApiSpecification {
    fn satisfies_key_spec(&self, idempotency_key: &str) -> bool {
        Uuid::parse_str(idempotency_key).is_ok()
    }

    fn fingerprint<'a>(
        &'a self,
        request: &'a Request<Bytes>,
    ) -> Pin<Box<dyn Future<Output = Option<Fingerprint>> + Send + 'a>> {
        let digest = format!("{:x}", Sha256::digest(request.body()));
        Box::pin(async move { Some(Fingerprint::new(digest)) })
    }

    fn storage_key<'a>(
        &'a self,
        idempotency_key: &'a str,
        request: &'a Request<Bytes>,
    ) -> Pin<Box<dyn Future<Output = StorageKey> + Send + 'a>> {
        let key = StorageKey::new(format!("{}-{idempotency_key}", request.uri().path()));
        Box::pin(async move { key })
    }
}
