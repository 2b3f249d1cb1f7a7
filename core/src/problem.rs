//! `application/problem+json` responses for client protocol errors.
//!
//! See draft-ietf-httpapi-idempotency-key-header, section 2.7.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use serde::Serialize;

/// Content type of every problem response.
pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Problem details body.
#[derive(Debug, Serialize)]
struct Problem<'a> {
    title: &'a str,
    detail: &'a str,
}

fn problem_response(status: StatusCode, title: &str, detail: &str) -> Response<Bytes> {
    let body = serde_json::to_vec(&Problem { title, detail }).unwrap_or_default();
    let mut response = Response::new(Bytes::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PROBLEM_CONTENT_TYPE));
    response
}

/// 400: the key is missing or does not satisfy the server specification.
#[must_use]
pub fn key_missing() -> Response<Bytes> {
    problem_response(
        StatusCode::BAD_REQUEST,
        "Idempotency-Key is missing",
        "This operation is idempotent and it requires correct usage of Idempotency Key.",
    )
}

/// 409: the original request is still being processed.
#[must_use]
pub fn key_conflict() -> Response<Bytes> {
    problem_response(
        StatusCode::CONFLICT,
        "A request is outstanding for this Idempotency-Key",
        "A request with the same Idempotency-Key for the same operation is being processed \
         or is outstanding.",
    )
}

/// 422: the key was reused with a different payload.
#[must_use]
pub fn key_payload_mismatch() -> Response<Bytes> {
    problem_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Idempotency-Key is already used",
        "This operation is idempotent and it requires correct usage of Idempotency Key. \
         Idempotency Key MUST not be reused across different payloads of this operation.",
    )
}

/// 500: stored in place of the response of a handler that panicked.
#[must_use]
pub fn handler_failure() -> Response<Bytes> {
    problem_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Server Error",
        "The request handler failed before producing a response.",
    )
}
