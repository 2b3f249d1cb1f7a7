//! # Idempotent Request Testing
//!
//! Testing utilities for the idempotency engine.
//!
//! This crate provides:
//! - [`InMemoryStorageDriver`]: `HashMap`-backed driver with atomic insert-if-absent
//! - [`FailingStorageDriver`]: driver wrapper that fails selected operations
//! - [`TestSpecification`]: UUID v4 keys, SHA-256 fingerprints
//! - [`FixedClock`]: deterministic lock timestamps
//! - [`HandlerGate`]: hold a handler mid-execution to provoke conflicts
//!
//! ## Example
//!
//! ```ignore
//! use idempotent_request_core::IdempotencyEngine;
//! use idempotent_request_testing::{InMemoryStorageDriver, TestSpecification, test_clock};
//!
//! #[tokio::test]
//! async fn test_replay() {
//!     let driver = InMemoryStorageDriver::new();
//!     let engine = IdempotencyEngine::builder()
//!         .specification(TestSpecification::new())
//!         .driver(driver.clone())
//!         .clock(test_clock())
//!         .build()
//!         .unwrap();
//!     // ...
//! }
//! ```

pub mod driver;
pub mod gate;
pub mod specification;

use chrono::{DateTime, Utc};
use idempotent_request_core::Clock;

pub use driver::{FailingStorageDriver, FailurePoint, InMemoryStorageDriver};
pub use gate::HandlerGate;
pub use specification::TestSpecification;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use idempotent_request_testing::mocks::FixedClock;
    /// use idempotent_request_core::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a `tracing` subscriber for test output.
///
/// Honours `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "idempotent_request_core=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }
}
