//! The job lifecycle controller and its handle.

pub mod events;
pub mod lifecycle;
pub mod watchdog;

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::{expand_home, Config};
use crate::error::{ConfigError, ControllerError};
use crate::finalize::FinalizeOptions;
use crate::sensor::TriggerEvent;

pub use events::{EventBroadcaster, LifecycleEvent, TimestampedEvent};
pub use lifecycle::JobLifecycleController;
pub use watchdog::{Expiry, InactivityWatchdog};

/// Runtime settings derived from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub enabled: bool,
    pub capture_delay: Duration,
    pub inactivity_timeout: Duration,
    pub ignore_trigger_count: u32,
    pub snapshot_root: PathBuf,
    pub finalize: FinalizeOptions,
    pub shutdown_grace: Duration,
}

impl ControllerConfig {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: config.enabled,
            capture_delay: Duration::from_secs(config.capture_delay_seconds),
            inactivity_timeout: Duration::from_secs(config.inactivity_timeout_seconds),
            ignore_trigger_count: config.ignore_trigger_count,
            snapshot_root: expand_home(&config.snapshot_folder)?,
            finalize: FinalizeOptions::from_config(config),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_seconds),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// No open job.
    Idle,
    /// A capture is scheduled or in flight.
    Capturing,
    /// A job is open and waiting for the next dark edge or for inactivity.
    Armed,
    Finalizing,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "idle"),
            ControllerState::Capturing => write!(f, "capturing"),
            ControllerState::Armed => write!(f, "armed"),
            ControllerState::Finalizing => write!(f, "finalizing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJob {
    pub id: String,
    pub folder: PathBuf,
    pub frame_count: u32,
}

/// Point-in-time snapshot of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub enabled: bool,
    pub active_job: Option<ActiveJob>,
    pub capture_pending: bool,
    pub ignoring_triggers: bool,
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub jobs_finalized: u64,
}

pub(crate) enum Command {
    Enable,
    Disable,
    Reload(Box<ControllerConfig>),
    Status(oneshot::Sender<ControllerStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    edges: mpsc::Sender<TriggerEvent>,
    commands: mpsc::Sender<Command>,
    events: EventBroadcaster,
}

impl ControllerHandle {
    pub(crate) fn new(
        edges: mpsc::Sender<TriggerEvent>,
        commands: mpsc::Sender<Command>,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            edges,
            commands,
            events,
        }
    }

    /// Sender for debounced edges, for sensors driven outside the controller.
    pub fn edge_sender(&self) -> mpsc::Sender<TriggerEvent> {
        self.edges.clone()
    }

    pub async fn send_edge(&self, edge: TriggerEvent) -> Result<(), ControllerError> {
        self.edges
            .send(edge)
            .await
            .map_err(|_| ControllerError::NotRunning)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> Result<ControllerStatus, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status(reply)).await?;
        rx.await.map_err(|_| ControllerError::NoReply)
    }

    pub async fn enable(&self) -> Result<(), ControllerError> {
        self.send(Command::Enable).await
    }

    /// Cancels pending work and drops the open job without finalizing it.
    pub async fn disable(&self) -> Result<(), ControllerError> {
        self.send(Command::Disable).await
    }

    pub async fn reload(&self, config: ControllerConfig) -> Result<(), ControllerError> {
        self.send(Command::Reload(Box::new(config))).await
    }

    /// Stops the controller and waits for it to wind down.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown(reply)).await?;
        rx.await.map_err(|_| ControllerError::NoReply)
    }

    async fn send(&self, command: Command) -> Result<(), ControllerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ControllerError::NotRunning)
    }
}
