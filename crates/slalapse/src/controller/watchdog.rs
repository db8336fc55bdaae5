use std::time::Duration;

use tokio::time::Instant;

use crate::timer::Deadline;

/// What an expired watchdog asks the controller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Finalize,
    /// A capture is pending or in flight; finalize once it completes.
    Deferred,
}

/// Detects the end of a print from sensor inactivity.
///
/// Each qualifying edge moves the single deadline forward. Once it has
/// fired for a job it stays quiet until [`reset`](Self::reset).
#[derive(Debug)]
pub struct InactivityWatchdog {
    timeout: Duration,
    deadline: Deadline,
    deferred: bool,
    fired: bool,
}

impl InactivityWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: Deadline::new(),
            deferred: false,
            fired: false,
        }
    }

    /// Applies to the next arm.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Records activity at `now`. Idempotent; a no-op after firing.
    pub fn arm(&mut self, now: Instant) {
        if self.fired {
            return;
        }
        self.deferred = false;
        self.deadline.arm_after(now, self.timeout);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.at()
    }

    /// Handles an elapsed deadline.
    pub fn expire(&mut self, capture_pending: bool) -> Option<Expiry> {
        if self.fired || !self.deadline.cancel() {
            return None;
        }
        if capture_pending {
            self.deferred = true;
            return Some(Expiry::Deferred);
        }
        self.fired = true;
        Some(Expiry::Finalize)
    }

    /// Returns true if a deferred expiry may now finalize.
    pub fn resume(&mut self, capture_pending: bool) -> bool {
        if !self.deferred || capture_pending {
            return false;
        }
        self.deferred = false;
        self.fired = true;
        true
    }

    /// Clears all state for the next job.
    pub fn reset(&mut self) {
        self.deadline.cancel();
        self.deferred = false;
        self.fired = false;
    }
}
