//! Lifecycle event broadcasting for observers (CLI output, tests, UIs).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::ControllerState;
use crate::finalize::FinalizationResult;

/// Something the controller did or decided.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LifecycleEvent {
    StateChanged {
        from: ControllerState,
        to: ControllerState,
    },
    #[serde(rename_all = "camelCase")]
    TriggerIgnored { count: u32, limit: u32 },
    #[serde(rename_all = "camelCase")]
    JobStarted { job_id: String, folder: PathBuf },
    #[serde(rename_all = "camelCase")]
    JobAllocationFailed { error: String },
    #[serde(rename_all = "camelCase")]
    CaptureScheduled { job_id: String },
    #[serde(rename_all = "camelCase")]
    CaptureCancelled { job_id: String },
    #[serde(rename_all = "camelCase")]
    FrameCaptured {
        job_id: String,
        sequence_number: u32,
        path: PathBuf,
    },
    #[serde(rename_all = "camelCase")]
    CaptureFailed { job_id: String, error: String },
    #[serde(rename_all = "camelCase")]
    FinalizeDeferred { job_id: String },
    #[serde(rename_all = "camelCase")]
    FinalizeStarted { job_id: String, frames: u32 },
    JobFinalized { result: FinalizationResult },
    #[serde(rename_all = "camelCase")]
    JobAbandoned { job_id: String, frames: u32 },
    Enabled,
    Disabled,
    ConfigReloaded,
}

/// Event with the wall-clock time it was emitted.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LifecycleEvent,
}

#[derive(Clone)]
pub struct EventBroadcaster {
    sender: Arc<broadcast::Sender<TimestampedEvent>>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(TimestampedEvent {
            timestamp: Utc::now(),
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
