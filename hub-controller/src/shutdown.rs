//! Cooperative shutdown signal observed by every long-running loop.
//!
//! Per spec §5: a single shutdown flag, observed by the DLM loop, every
//! node's telemetry loop, and the vehicle-telemetry taps, driving the
//! ordered stop sequence in `hub::HubDevice::stop`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cooperative shutdown flag, cheap to clone and share across tasks.
#[derive(Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    /// Create a new, not-yet-triggered shutdown handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Has shutdown been triggered?
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Trigger shutdown and wake every waiter.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Wait until shutdown is triggered.
    ///
    /// Safe to call after `trigger()` has already fired, and safe against a
    /// `trigger()` racing in between the flag check and the wait:
    /// `notify_waiters()` only wakes waiters already registered at the time
    /// it's called, so the `Notified` future is obtained *before* re-checking
    /// the flag, not after. A `trigger()` landing anywhere in that window
    /// still wakes this call.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
