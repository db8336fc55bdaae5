//! Debouncing of raw sensor transitions.
//!
//! A raw change starts (or restarts) a quiet window. Only when the level has
//! held for the whole window is it emitted, and only if it differs from the
//! last emitted level, so a bounce that settles where it started is silent.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Level, TriggerEvent};
use crate::config::DarkLevel;
use crate::timer::sleep_until_opt;

pub struct EdgeDebouncer {
    window: Duration,
    stable: Level,
    pending: Option<(Level, Instant)>,
}

impl EdgeDebouncer {
    pub fn new(window: Duration, initial: Level) -> Self {
        Self {
            window,
            stable: initial,
            pending: None,
        }
    }

    /// The last level that was emitted (or the initial level).
    pub fn stable_level(&self) -> Level {
        self.stable
    }

    /// Records a raw level sample taken at `at`.
    pub fn observe(&mut self, level: Level, at: Instant) {
        if level == self.stable {
            if self.pending.take().is_some() {
                log::trace!("Sensor bounced back to {}", level);
            }
            return;
        }

        match self.pending {
            Some((pending, _)) if pending == level => {}
            _ => self.pending = Some((level, at)),
        }
    }

    /// When the pending level will have been stable for the full window.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|(_, since)| since + self.window)
    }

    /// Emits the pending level if it has settled by `now`.
    pub fn poll(&mut self, now: Instant) -> Option<TriggerEvent> {
        let (level, since) = self.pending?;
        if now < since + self.window {
            return None;
        }

        self.pending = None;
        self.stable = level;
        Some(TriggerEvent::new(level, now))
    }

    /// Drives the debouncer from raw pin levels until either channel closes.
    pub async fn run(
        mut self,
        mut raw_rx: mpsc::Receiver<bool>,
        dark_level: DarkLevel,
        edges: mpsc::Sender<TriggerEvent>,
    ) {
        loop {
            let deadline = self.deadline();

            tokio::select! {
                raw = raw_rx.recv() => match raw {
                    Some(high) => {
                        self.observe(Level::from_raw(high, dark_level), Instant::now());
                        // A zero-length window settles immediately.
                        if let Some(event) = self.poll(Instant::now()) {
                            if edges.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => {
                        log::debug!("Raw sensor channel closed");
                        break;
                    }
                },
                _ = sleep_until_opt(deadline) => {
                    if let Some(event) = self.poll(Instant::now()) {
                        log::debug!("Sensor settled: {}", event.level);
                        if edges.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
