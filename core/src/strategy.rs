//! Activation strategy: does idempotency handling apply to this request?

use crate::error::ConfigError;
use bytes::Bytes;
use http::header::HeaderName;
use http::Request;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

/// Custom activation predicate.
///
/// Implementations that want strict gating MUST check the presence of the
/// idempotency key header themselves; the engine does not do it for them.
///
/// Plain closures `Fn(&Request<Bytes>) -> bool` implement this trait.
pub trait ActivationPredicate: Send + Sync {
    /// Return `true` to apply idempotency handling to `request`.
    fn is_active<'a>(
        &'a self,
        request: &'a Request<Bytes>,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

impl<F> ActivationPredicate for F
where
    F: Fn(&Request<Bytes>) -> bool + Send + Sync,
{
    fn is_active<'a>(
        &'a self,
        request: &'a Request<Bytes>,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        let active = self(request);
        Box::pin(async move { active })
    }
}

/// Strategy for activating idempotency processing.
///
/// Defaults to [`ActivationStrategy::Always`].
#[derive(Clone, Default)]
pub enum ActivationStrategy {
    /// Every request is handled.
    #[default]
    Always,
    /// Only requests carrying the idempotency key header are handled.
    ///
    /// An empty header value still counts as present.
    OptIn,
    /// Arbitrary predicate, e.g. a feature flag.
    Custom(Arc<dyn ActivationPredicate>),
}

impl ActivationStrategy {
    /// Wrap a custom predicate.
    #[must_use]
    pub fn custom(predicate: impl ActivationPredicate + 'static) -> Self {
        Self::Custom(Arc::new(predicate))
    }

    /// Decide whether `request` is subject to idempotency handling.
    pub async fn decide(&self, key_header: &HeaderName, request: &Request<Bytes>) -> bool {
        match self {
            Self::Always => true,
            Self::OptIn => request.headers().contains_key(key_header),
            Self::Custom(predicate) => predicate.is_active(request).await,
        }
    }
}

impl fmt::Debug for ActivationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::OptIn => f.write_str("OptIn"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl FromStr for ActivationStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(Self::Always),
            "opt-in" => Ok(Self::OptIn),
            other => Err(ConfigError::UnknownActivationStrategy(other.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn key_header() -> HeaderName {
        HeaderName::from_static("idempotency-key")
    }

    fn request(key: Option<&str>) -> Request<Bytes> {
        let mut builder = Request::builder().method("POST").uri("/api/hello");
        if let Some(key) = key {
            builder = builder.header("Idempotency-Key", key);
        }
        builder.body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn test_always_is_active() {
        let strategy = ActivationStrategy::default();
        assert!(strategy.decide(&key_header(), &request(None)).await);
        assert!(strategy.decide(&key_header(), &request(Some("k"))).await);
    }

    #[tokio::test]
    async fn test_opt_in_requires_header() {
        let strategy: ActivationStrategy = "opt-in".parse().unwrap();
        assert!(!strategy.decide(&key_header(), &request(None)).await);
        assert!(strategy.decide(&key_header(), &request(Some("k"))).await);
    }

    #[tokio::test]
    async fn test_opt_in_counts_empty_header_as_present() {
        let strategy = ActivationStrategy::OptIn;
        assert!(strategy.decide(&key_header(), &request(Some(""))).await);
    }

    #[tokio::test]
    async fn test_custom_predicate_is_used_as_is() {
        let strategy = ActivationStrategy::custom(|req: &Request<Bytes>| {
            req.headers().get("x-enable-idempotency").is_some_and(|v| v == "true")
        });

        let plain = request(Some("k"));
        let mut flagged = request(None);
        flagged
            .headers_mut()
            .insert("x-enable-idempotency", "true".parse().unwrap());

        assert!(!strategy.decide(&key_header(), &plain).await);
        // Key presence is the predicate's responsibility.
        assert!(strategy.decide(&key_header(), &flagged).await);
    }

    #[test]
    fn test_unknown_tag_is_config_error() {
        let err = "sometimes".parse::<ActivationStrategy>().unwrap_err();
        assert_eq!(err, ConfigError::UnknownActivationStrategy("sometimes".to_string()));
    }
}
