//! Deterministic interleaving of concurrent requests.
//!
//! A handler calls [`HandlerGate::pass`] and stays parked until the test
//! calls [`HandlerGate::release`]. Meanwhile the test waits for
//! [`HandlerGate::entered`] and fires a second request with the same key,
//! which is guaranteed to observe the lock.

use std::sync::Arc;
use tokio::sync::Notify;

/// Two-way rendezvous between a handler and a test.
#[derive(Debug, Clone, Default)]
pub struct HandlerGate {
    entered: Arc<Notify>,
    released: Arc<Notify>,
}

impl HandlerGate {
    /// Create a closed gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the handler: signal entry, then wait for release.
    pub async fn pass(&self) {
        self.entered.notify_one();
        self.released.notified().await;
    }

    /// Called by the test: wait until a handler is parked in [`pass`](Self::pass).
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the parked handler continue.
    pub fn release(&self) {
        self.released.notify_one();
    }
}
