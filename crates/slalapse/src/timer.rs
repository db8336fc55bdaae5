//! Cancellable one-shot deadlines for `select!` loops.

use std::time::Duration;

use tokio::time::Instant;

/// Stand-in for "never" when a delay does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A single rearmable deadline. Arming again supersedes the previous
/// deadline; cancelling makes [`sleep_until_opt`] pend forever.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn new() -> Self {
        Self { at: None }
    }

    pub fn arm_at(&mut self, at: Instant) {
        self.at = Some(at);
    }

    /// Arms `delay` after `from`, saturating at a far-future instant.
    pub fn arm_after(&mut self, from: Instant, delay: Duration) {
        let at = from
            .checked_add(delay)
            .or_else(|| from.checked_add(FAR_FUTURE))
            .unwrap_or(from);
        self.arm_at(at);
    }

    /// Returns true if a deadline was pending.
    pub fn cancel(&mut self) -> bool {
        self.at.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    pub fn at(&self) -> Option<Instant> {
        self.at
    }

}

/// Sleeps until `deadline`, or forever when there is none.
pub async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
