//! Time source for lock timestamps.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
///
/// The record store stamps `locked_at` with [`Clock::now`].
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
