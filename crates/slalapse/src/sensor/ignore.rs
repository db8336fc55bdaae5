use super::TriggerEvent;

/// Drops the first `limit` dark edges of a session.
///
/// Light edges seen during the ignore phase are dropped as well, without
/// counting, so a half-ignored dark/light pair never reaches the controller.
#[derive(Debug, Clone)]
pub struct TriggerIgnoreFilter {
    limit: u32,
    ignored: u32,
    /// Limit waiting for the next [`reset`](Self::reset).
    pending_limit: Option<u32>,
}

impl TriggerIgnoreFilter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            ignored: 0,
            pending_limit: None,
        }
    }

    /// Returns true if the event should be forwarded.
    pub fn admit(&mut self, event: &TriggerEvent) -> bool {
        if self.ignored >= self.limit {
            return true;
        }

        if event.is_dark() {
            self.ignored += 1;
            log::info!("Ignoring trigger {}/{}", self.ignored, self.limit);
        } else {
            log::debug!("Ignoring {} edge during ignore phase", event.level);
        }
        false
    }

    /// Starts a fresh ignore phase, applying any deferred limit.
    pub fn reset(&mut self) {
        if let Some(limit) = self.pending_limit.take() {
            self.limit = limit;
        }
        self.ignored = 0;
    }

    /// Changes the limit and starts a fresh ignore phase.
    pub fn set_limit(&mut self, limit: u32) {
        self.pending_limit = None;
        self.limit = limit;
        self.reset();
    }

    /// Changes the limit at the next reset, leaving the current phase alone.
    pub fn defer_limit(&mut self, limit: u32) {
        self.pending_limit = (limit != self.limit).then_some(limit);
    }

    /// Dark edges dropped so far in this ignore phase.
    pub fn ignored(&self) -> u32 {
        self.ignored
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn is_ignoring(&self) -> bool {
        self.ignored < self.limit
    }
}
