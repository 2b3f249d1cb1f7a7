//! Storable form of an HTTP response.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, SET_COOKIE};
use http::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Separator for repeated `Set-Cookie` values. Header values cannot contain
/// a newline, so splitting on it is lossless.
const SET_COOKIE_SEPARATOR: &str = "\n";

/// How [`SerializedResponse::body`] is encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    /// Body is the response text as-is.
    #[default]
    Utf8,
    /// Body is standard base64 of the raw bytes.
    Base64,
}

impl BodyEncoding {
    #[allow(clippy::trivially_copy_pass_by_ref)] // serde passes by reference
    const fn is_utf8(&self) -> bool {
        matches!(self, Self::Utf8)
    }
}

/// A response captured for replay.
///
/// Header names are stored lower-cased. Repeated headers are joined with
/// `", "`, except `set-cookie`, whose values are kept one per line and
/// replayed as separate headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase for the status code.
    pub status_text: String,
    /// Response headers keyed by lower-cased name.
    pub headers: BTreeMap<String, String>,
    /// Response body, text or base64 per `body_encoding`.
    pub body: String,
    /// Encoding of `body`. Absent in stored JSON means UTF-8 text.
    #[serde(default, skip_serializing_if = "BodyEncoding::is_utf8")]
    pub body_encoding: BodyEncoding,
}

/// A stored response could not be turned back into an HTTP response.
#[derive(Error, Debug)]
pub enum ResponseDecodeError {
    /// Status code outside 100..=999.
    #[error("invalid status code: {0}")]
    InvalidStatus(u16),

    /// Header name or value rejected by the HTTP types.
    #[error("invalid header {name:?}")]
    InvalidHeader {
        /// Offending header name.
        name: String,
    },

    /// Base64 body that does not decode.
    #[error("invalid base64 body: {0}")]
    InvalidBody(#[from] base64::DecodeError),
}

impl SerializedResponse {
    /// Capture `response` without consuming it.
    ///
    /// UTF-8 bodies are stored as text, anything else as base64.
    #[must_use]
    pub fn capture(response: &Response<Bytes>) -> Self {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let separator = if *name == SET_COOKIE {
                SET_COOKIE_SEPARATOR
            } else {
                ", "
            };
            let value = String::from_utf8_lossy(value.as_bytes());
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(separator);
                    existing.push_str(&value);
                })
                .or_insert_with(|| value.into_owned());
        }

        let (body, body_encoding) = match std::str::from_utf8(response.body()) {
            Ok(text) => (text.to_string(), BodyEncoding::Utf8),
            Err(_) => (STANDARD.encode(response.body()), BodyEncoding::Base64),
        };

        Self {
            status: response.status().as_u16(),
            status_text: response
                .status()
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
            headers,
            body,
            body_encoding,
        }
    }

    /// Rebuild an HTTP response from the stored form.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseDecodeError`] if the stored status, a header or a
    /// base64 body is invalid.
    pub fn to_response(&self) -> Result<Response<Bytes>, ResponseDecodeError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| ResponseDecodeError::InvalidStatus(self.status))?;

        let body = match self.body_encoding {
            BodyEncoding::Utf8 => Bytes::from(self.body.clone()),
            BodyEncoding::Base64 => Bytes::from(STANDARD.decode(&self.body)?),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            let invalid = || ResponseDecodeError::InvalidHeader { name: name.clone() };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            if header_name == SET_COOKIE {
                for cookie in value.split(SET_COOKIE_SEPARATOR) {
                    let cookie = HeaderValue::from_str(cookie).map_err(|_| invalid())?;
                    headers.append(header_name.clone(), cookie);
                }
            } else {
                let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
                headers.insert(header_name, header_value);
            }
        }

        Ok(response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn stored(status: u16, headers: BTreeMap<String, String>, body: &str) -> SerializedResponse {
        SerializedResponse {
            status,
            status_text: String::new(),
            headers,
            body: body.to_string(),
            body_encoding: BodyEncoding::Utf8,
        }
    }

    #[test]
    fn test_capture_lowercases_headers() {
        let response = Response::builder()
            .status(200)
            .header("Content-Type", "text/plain")
            .header("X-Test-Header", "test-value")
            .body(Bytes::from_static(b"Test body"))
            .unwrap();

        let serialized = SerializedResponse::capture(&response);

        assert_eq!(serialized.status, 200);
        assert_eq!(serialized.status_text, "OK");
        assert_eq!(serialized.body, "Test body");
        assert_eq!(serialized.body_encoding, BodyEncoding::Utf8);
        assert_eq!(serialized.headers.get("content-type").map(String::as_str), Some("text/plain"));
        assert_eq!(serialized.headers.get("x-test-header").map(String::as_str), Some("test-value"));
    }

    #[test]
    fn test_capture_does_not_consume_original() {
        let response = Response::new(Bytes::from_static(b"Test body"));
        let _ = SerializedResponse::capture(&response);
        assert_eq!(response.body().as_ref(), b"Test body");
    }

    #[test]
    fn test_capture_joins_repeated_headers() {
        let response = Response::builder()
            .header("Vary", "Accept")
            .header("Vary", "Origin")
            .body(Bytes::new())
            .unwrap();

        let serialized = SerializedResponse::capture(&response);
        assert_eq!(serialized.headers.get("vary").map(String::as_str), Some("Accept, Origin"));
    }

    #[test]
    fn test_set_cookie_values_stay_separate() {
        let response = Response::builder()
            .header("Set-Cookie", "a=1; Expires=Wed, 21 Oct 2026 07:28:00 GMT")
            .header("Set-Cookie", "b=2")
            .body(Bytes::new())
            .unwrap();

        let replayed = SerializedResponse::capture(&response).to_response().unwrap();

        let cookies: Vec<_> = replayed
            .headers()
            .get_all("set-cookie")
            .iter()
            .map(|value| value.to_str().unwrap())
            .collect();
        assert_eq!(cookies, ["a=1; Expires=Wed, 21 Oct 2026 07:28:00 GMT", "b=2"]);
    }

    #[test]
    fn test_binary_body_is_stored_as_base64() {
        let bytes: &'static [u8] = &[0x1f, 0x8b, 0xff, 0x00];
        let response = Response::new(Bytes::from_static(bytes));

        let serialized = SerializedResponse::capture(&response);
        assert_eq!(serialized.body_encoding, BodyEncoding::Base64);
        assert_eq!(serialized.body, "H4v/AA==");

        let json = serde_json::to_value(&serialized).unwrap();
        assert_eq!(json["body_encoding"], "base64");
        let restored: SerializedResponse = serde_json::from_value(json).unwrap();

        assert_eq!(restored.to_response().unwrap().body().as_ref(), bytes);
    }

    #[test]
    fn test_missing_body_encoding_reads_as_text() {
        let json = serde_json::json!({
            "status": 200,
            "status_text": "OK",
            "headers": {},
            "body": "ok",
        });

        let serialized: SerializedResponse = serde_json::from_value(json).unwrap();

        assert_eq!(serialized.body_encoding, BodyEncoding::Utf8);
        assert!(serde_json::to_value(&serialized).unwrap().get("body_encoding").is_none());
    }

    #[test]
    fn test_to_response_is_case_insensitive() {
        let serialized = stored(
            201,
            BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
            "{\"id\":1}",
        );

        let response = serialized.to_response().unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("Content-Type").unwrap(), "application/json");
        assert_eq!(response.body().as_ref(), b"{\"id\":1}");
    }

    #[test]
    fn test_to_response_rejects_invalid_status() {
        let serialized = stored(42, BTreeMap::new(), "");
        assert!(matches!(
            serialized.to_response(),
            Err(ResponseDecodeError::InvalidStatus(42))
        ));
    }

    #[test]
    fn test_to_response_rejects_invalid_header() {
        let serialized = stored(
            200,
            BTreeMap::from([("bad header".to_string(), "x".to_string())]),
            "",
        );
        assert!(matches!(
            serialized.to_response(),
            Err(ResponseDecodeError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_to_response_rejects_invalid_base64() {
        let serialized = SerializedResponse {
            body_encoding: BodyEncoding::Base64,
            ..stored(200, BTreeMap::new(), "not base64!")
        };
        assert!(matches!(
            serialized.to_response(),
            Err(ResponseDecodeError::InvalidBody(_))
        ));
    }
}
