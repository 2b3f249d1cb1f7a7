//! Engine configuration loaded from environment variables.

use crate::engine::IDEMPOTENCY_KEY_HEADER;
use crate::error::ConfigError;
use crate::strategy::ActivationStrategy;
use http::header::HeaderName;
use serde::{Deserialize, Serialize};
use std::env;

/// Default cap on buffered request and response bodies (2 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Idempotency settings.
///
/// | Variable | Default |
/// |---|---|
/// | `IDEMPOTENCY_ACTIVATION_STRATEGY` | `always` |
/// | `IDEMPOTENCY_KEY_HEADER` | `Idempotency-Key` |
/// | `IDEMPOTENCY_STATUS_HEADER` | unset (no status header) |
/// | `IDEMPOTENCY_MAX_BODY_BYTES` | `2097152` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// `always` or `opt-in`.
    pub activation_strategy: String,
    /// Request header carrying the idempotency key.
    pub key_header: String,
    /// Response header reporting the situation tag, if any.
    pub status_header: Option<String>,
    /// Maximum buffered body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            activation_strategy: "always".to_string(),
            key_header: "Idempotency-Key".to_string(),
            status_header: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl IdempotencyConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a value is present but invalid. Unknown
    /// strategy tags and bad header names are rejected here, at setup time.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_body_bytes = match env::var("IDEMPOTENCY_MAX_BODY_BYTES") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: "IDEMPOTENCY_MAX_BODY_BYTES",
                value: raw,
            })?,
            Err(_) => defaults.max_body_bytes,
        };

        let config = Self {
            activation_strategy: env::var("IDEMPOTENCY_ACTIVATION_STRATEGY")
                .unwrap_or(defaults.activation_strategy),
            key_header: env::var("IDEMPOTENCY_KEY_HEADER").unwrap_or(defaults.key_header),
            status_header: env::var("IDEMPOTENCY_STATUS_HEADER").ok().filter(|h| !h.is_empty()),
            max_body_bytes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every setting without building anything.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.activation_strategy()?;
        self.key_header_name()?;
        self.status_header_name()?;
        Ok(())
    }

    /// Parsed activation strategy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownActivationStrategy`] for unknown tags.
    pub fn activation_strategy(&self) -> Result<ActivationStrategy, ConfigError> {
        self.activation_strategy.parse()
    }

    /// Parsed key header name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHeaderName`] if the name is not a valid header.
    pub fn key_header_name(&self) -> Result<HeaderName, ConfigError> {
        if self.key_header.is_empty() {
            return Ok(HeaderName::from_static(IDEMPOTENCY_KEY_HEADER));
        }
        parse_header(&self.key_header)
    }

    /// Parsed status header name, if configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHeaderName`] if the name is not a valid header.
    pub fn status_header_name(&self) -> Result<Option<HeaderName>, ConfigError> {
        self.status_header.as_deref().map(parse_header).transpose()
    }
}

fn parse_header(name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ConfigError::InvalidHeaderName(name.to_string()))
}
