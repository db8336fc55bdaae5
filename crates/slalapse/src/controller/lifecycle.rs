//! The controller actor.
//!
//! All job state is owned by one task. Sensor edges, commands, timer expiry
//! and task completions are observed in a single `select!` loop, so a light
//! edge and the capture timer can never both proceed. Captures and
//! finalizations run as spawned tasks; the loop only decides and records.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

use super::events::{EventBroadcaster, LifecycleEvent};
use super::watchdog::{Expiry, InactivityWatchdog};
use super::{ActiveJob, Command, ControllerConfig, ControllerHandle, ControllerState, ControllerStatus};
use crate::capture::{SnapshotCapturer, SnapshotSource};
use crate::error::{CaptureError, SensorError};
use crate::finalize::{FinalizationResult, Finalizer, VideoEncoder};
use crate::job::{Frame, Job, JobFolderManager};
use crate::sensor::{SensorConfig, SensorPipeline, SensorSource, TriggerEvent, TriggerIgnoreFilter};
use crate::timer::{sleep_until_opt, Deadline};

const EDGE_CHANNEL_CAPACITY: usize = 64;
const COMMAND_CHANNEL_CAPACITY: usize = 16;

enum TaskOutcome {
    Capture {
        job_id: String,
        result: Result<Frame, CaptureError>,
    },
    Finalize {
        job_id: String,
        result: FinalizationResult,
    },
}

#[derive(Default)]
struct Counters {
    frames_captured: u64,
    capture_failures: u64,
    jobs_finalized: u64,
}

pub struct JobLifecycleController {
    config: ControllerConfig,
    enabled: bool,
    jobs: JobFolderManager,
    capturer: SnapshotCapturer,
    encoder: Arc<dyn VideoEncoder>,
    finalizer: Finalizer,
    ignore: TriggerIgnoreFilter,
    capture_timer: Deadline,
    watchdog: InactivityWatchdog,
    /// Job id and task id of the capture in flight.
    capture_task: Option<(String, tokio::task::Id)>,
    /// Job id and task id of the running finalization.
    finalize_task: Option<(String, tokio::task::Id)>,
    tasks: JoinSet<TaskOutcome>,
    events: EventBroadcaster,
    sensor: Option<SensorPipeline>,
    counters: Counters,
    state: ControllerState,
}

impl JobLifecycleController {
    pub fn new(
        config: ControllerConfig,
        snapshots: Arc<dyn SnapshotSource>,
        encoder: Arc<dyn VideoEncoder>,
    ) -> Self {
        let finalizer = Finalizer::new(
            &config.snapshot_root,
            config.finalize.clone(),
            Arc::clone(&encoder),
        );

        Self {
            enabled: config.enabled,
            jobs: JobFolderManager::new(&config.snapshot_root),
            capturer: SnapshotCapturer::new(snapshots),
            encoder,
            finalizer,
            ignore: TriggerIgnoreFilter::new(config.ignore_trigger_count),
            capture_timer: Deadline::new(),
            watchdog: InactivityWatchdog::new(config.inactivity_timeout),
            capture_task: None,
            finalize_task: None,
            tasks: JoinSet::new(),
            events: EventBroadcaster::default(),
            sensor: None,
            counters: Counters::default(),
            state: ControllerState::Idle,
            config,
        }
    }

    /// Starts the actor. Edges are pushed through the returned handle.
    pub fn spawn(self) -> ControllerHandle {
        let (edge_tx, edge_rx) = mpsc::channel(EDGE_CHANNEL_CAPACITY);
        self.spawn_with_edges(edge_tx, edge_rx)
    }

    /// Subscribes to `source` and starts the actor. The subscription is
    /// released when the controller shuts down.
    pub fn spawn_with_sensor(
        mut self,
        source: Box<dyn SensorSource>,
        sensor: &SensorConfig,
    ) -> Result<ControllerHandle, SensorError> {
        let (edge_tx, edge_rx) = mpsc::channel(EDGE_CHANNEL_CAPACITY);
        self.sensor = Some(SensorPipeline::start(source, sensor, edge_tx.clone())?);
        Ok(self.spawn_with_edges(edge_tx, edge_rx))
    }

    fn spawn_with_edges(
        self,
        edge_tx: mpsc::Sender<TriggerEvent>,
        edge_rx: mpsc::Receiver<TriggerEvent>,
    ) -> ControllerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = ControllerHandle::new(edge_tx, command_tx, self.events.clone());
        tokio::spawn(self.run(edge_rx, command_rx));
        handle
    }

    async fn run(
        mut self,
        mut edges: mpsc::Receiver<TriggerEvent>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        log::info!(
            "Controller started ({}), saving under {}",
            if self.enabled { "enabled" } else { "disabled" },
            self.config.snapshot_root.display()
        );
        let mut edges_open = true;

        let ack = loop {
            let capture_at = self.capture_timer.at();
            let watchdog_at = self.watchdog.deadline();

            // Edges queued before a command are handled first, and an edge
            // that is ready alongside an expired timer wins over the timer.
            tokio::select! {
                biased;

                edge = edges.recv(), if edges_open => match edge {
                    Some(edge) => self.on_edge(edge),
                    None => {
                        log::warn!("Sensor edge channel closed");
                        edges_open = false;
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Shutdown(ack)) => break Some(ack),
                    Some(command) => self.on_command(command),
                    None => break None,
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.on_task_joined(joined);
                }
                _ = sleep_until_opt(capture_at) => self.on_capture_timer(),
                _ = sleep_until_opt(watchdog_at) => self.on_watchdog(),
            }

            self.sync_state();
        };

        self.shutdown(ack).await;
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Enable => self.enable(),
            Command::Disable => self.disable(),
            Command::Reload(config) => self.reload(*config),
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown(_) => {}
        }
    }

    fn on_edge(&mut self, edge: TriggerEvent) {
        if !self.enabled {
            log::debug!("Disabled, ignoring {} edge", edge.level);
            return;
        }
        if let Some((job_id, _)) = &self.finalize_task {
            log::info!("Finalizing {}, dropping {} edge", job_id, edge.level);
            return;
        }
        if !self.ignore.admit(&edge) {
            if edge.is_dark() {
                self.events.send(LifecycleEvent::TriggerIgnored {
                    count: self.ignore.ignored(),
                    limit: self.ignore.limit(),
                });
            }
            return;
        }

        let now = Instant::now();
        if edge.is_dark() {
            self.on_dark(now);
        } else {
            self.on_light();
        }
    }

    fn on_dark(&mut self, now: Instant) {
        let starting = !self.jobs.has_open_job();
        let job = match self.jobs.ensure_active_job(now) {
            Ok(job) => job,
            Err(e) => {
                log::error!("Cannot start job, dropping trigger: {}", e);
                self.events.send(LifecycleEvent::JobAllocationFailed {
                    error: e.to_string(),
                });
                return;
            }
        };
        if starting {
            self.events.send(LifecycleEvent::JobStarted {
                job_id: job.id.clone(),
                folder: job.folder_path.clone(),
            });
        }

        self.jobs.touch(now);
        self.watchdog.arm(now);

        if self.capture_pending() {
            log::debug!("Capture already pending for {}, recording activity only", job.id);
            return;
        }

        self.capture_timer.arm_after(now, self.config.capture_delay);
        log::debug!(
            "Capture for {} in {:?}",
            job.id,
            self.config.capture_delay
        );
        self.events.send(LifecycleEvent::CaptureScheduled { job_id: job.id });
    }

    fn on_light(&mut self) {
        if !self.capture_timer.cancel() {
            return;
        }
        if let Some(job) = self.jobs.active() {
            log::info!("Light before capture delay elapsed, cancelled photo for {}", job.id);
            self.events.send(LifecycleEvent::CaptureCancelled {
                job_id: job.id.clone(),
            });
        }
        self.resume_deferred_finalize();
    }

    fn on_capture_timer(&mut self) {
        self.capture_timer.cancel();

        let Some(job) = self.jobs.active().filter(|job| job.is_open()).cloned() else {
            return;
        };

        let capturer = self.capturer.clone();
        let job_id = job.id.clone();
        let handle = self.tasks.spawn(async move {
            let result = capturer.capture(&job).await;
            TaskOutcome::Capture {
                job_id: job.id,
                result,
            }
        });
        self.capture_task = Some((job_id, handle.id()));
    }

    fn on_watchdog(&mut self) {
        let capture_pending = self.capture_pending();
        match self.watchdog.expire(capture_pending) {
            Some(Expiry::Finalize) => self.begin_finalize(),
            Some(Expiry::Deferred) => {
                if let Some(job) = self.jobs.active() {
                    log::info!("Inactivity timeout for {}, waiting for capture", job.id);
                    self.events.send(LifecycleEvent::FinalizeDeferred {
                        job_id: job.id.clone(),
                    });
                }
            }
            None => {}
        }
    }

    fn on_task_joined(&mut self, joined: Result<TaskOutcome, JoinError>) {
        match joined {
            Ok(TaskOutcome::Capture { job_id, result }) => self.on_capture_done(&job_id, result),
            Ok(TaskOutcome::Finalize { job_id, result }) => self.on_finalize_done(&job_id, result),
            Err(e) => self.on_task_failed(e),
        }
    }

    fn on_capture_done(&mut self, job_id: &str, result: Result<Frame, CaptureError>) {
        if self
            .capture_task
            .as_ref()
            .is_some_and(|(current, _)| current == job_id)
        {
            self.capture_task = None;
        }

        match result {
            Ok(frame) => {
                if self.jobs.record_frame(&frame) {
                    self.counters.frames_captured += 1;
                    self.events.send(LifecycleEvent::FrameCaptured {
                        job_id: frame.job_id,
                        sequence_number: frame.sequence_number,
                        path: frame.path,
                    });
                } else {
                    log::warn!(
                        "Frame {} arrived after {} was released; kept on disk",
                        frame.path.display(),
                        job_id
                    );
                }
            }
            Err(e) => {
                self.counters.capture_failures += 1;
                log::error!("Capture failed for {}: {}", job_id, e);
                self.events.send(LifecycleEvent::CaptureFailed {
                    job_id: job_id.to_string(),
                    error: e.to_string(),
                });
            }
        }

        self.resume_deferred_finalize();
    }

    fn on_finalize_done(&mut self, job_id: &str, result: FinalizationResult) {
        if self
            .finalize_task
            .as_ref()
            .is_some_and(|(current, _)| current == job_id)
        {
            self.finalize_task = None;
        }
        self.jobs.close_job(job_id);
        self.counters.jobs_finalized += 1;
        self.return_to_idle();

        if result.has_failures() {
            log::warn!("Job {} finalized with failures", job_id);
        }
        self.events.send(LifecycleEvent::JobFinalized { result });
    }

    fn on_task_failed(&mut self, error: JoinError) {
        let id = error.id();
        log::error!("Background task failed: {}", error);

        if let Some((job_id, _)) = self.capture_task.take_if(|(_, task)| *task == id) {
            self.counters.capture_failures += 1;
            self.events.send(LifecycleEvent::CaptureFailed {
                job_id,
                error: error.to_string(),
            });
            self.resume_deferred_finalize();
        } else if let Some((job_id, _)) = self.finalize_task.take_if(|(_, task)| *task == id) {
            // Never retried; the folder is left as it was.
            self.jobs.close_job(&job_id);
            self.return_to_idle();
        }
    }

    fn resume_deferred_finalize(&mut self) {
        if self.watchdog.resume(self.capture_pending()) {
            self.begin_finalize();
        }
    }

    fn begin_finalize(&mut self) {
        self.capture_timer.cancel();
        let Some(job) = self.jobs.begin_finalizing() else {
            self.watchdog.reset();
            return;
        };

        log::info!(
            "No activity for {:?}, finalizing {} ({} frames)",
            self.config.inactivity_timeout,
            job.id,
            job.frame_count
        );
        self.events.send(LifecycleEvent::FinalizeStarted {
            job_id: job.id.clone(),
            frames: job.frame_count,
        });

        let finalizer = self.finalizer.clone();
        let job_id = job.id.clone();
        let handle = self.tasks.spawn(async move {
            let result = finalizer.finalize(&job).await;
            TaskOutcome::Finalize {
                job_id: job.id,
                result,
            }
        });
        self.finalize_task = Some((job_id, handle.id()));
    }

    fn return_to_idle(&mut self) {
        self.capture_timer.cancel();
        self.watchdog.reset();
        self.ignore.reset();
    }

    fn enable(&mut self) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.ignore.reset();
        log::info!("Timelapse enabled");
        self.events.send(LifecycleEvent::Enabled);
    }

    fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        self.release_open_job();
        self.ignore.reset();
        log::info!("Timelapse disabled");
        self.events.send(LifecycleEvent::Disabled);
    }

    /// Cancels timers and drops an open job without finalizing. A running
    /// finalization is left to finish.
    fn release_open_job(&mut self) {
        self.capture_timer.cancel();
        self.capture_task = None;
        if self.finalize_task.is_some() {
            return;
        }
        self.watchdog.reset();
        if let Some(job) = self.jobs.abandon() {
            self.events.send(LifecycleEvent::JobAbandoned {
                job_id: job.id,
                frames: job.frame_count,
            });
        }
    }

    fn reload(&mut self, config: ControllerConfig) {
        self.watchdog.set_timeout(config.inactivity_timeout);
        if self.jobs.active().is_some() {
            // The job already got past its leading edges.
            self.ignore.defer_limit(config.ignore_trigger_count);
        } else {
            self.ignore.set_limit(config.ignore_trigger_count);
        }
        self.jobs.set_root(&config.snapshot_root);
        self.finalizer = Finalizer::new(
            &config.snapshot_root,
            config.finalize.clone(),
            Arc::clone(&self.encoder),
        );

        let enabled = config.enabled;
        self.config = config;
        log::info!("Configuration reloaded");
        self.events.send(LifecycleEvent::ConfigReloaded);

        if enabled {
            self.enable();
        } else {
            self.disable();
        }
    }

    fn capture_pending(&self) -> bool {
        self.capture_timer.is_armed() || self.capture_task.is_some()
    }

    fn current_state(&self) -> ControllerState {
        if self.finalize_task.is_some() {
            ControllerState::Finalizing
        } else if !self.jobs.has_open_job() {
            ControllerState::Idle
        } else if self.capture_pending() {
            ControllerState::Capturing
        } else {
            ControllerState::Armed
        }
    }

    fn sync_state(&mut self) {
        let state = self.current_state();
        if state != self.state {
            log::debug!("State {} -> {}", self.state, state);
            self.events.send(LifecycleEvent::StateChanged {
                from: self.state,
                to: state,
            });
            self.state = state;
        }
    }

    fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.current_state(),
            enabled: self.enabled,
            active_job: self.jobs.active().map(|job: &Job| ActiveJob {
                id: job.id.clone(),
                folder: job.folder_path.clone(),
                frame_count: job.frame_count,
            }),
            capture_pending: self.capture_pending(),
            ignoring_triggers: self.ignore.is_ignoring(),
            frames_captured: self.counters.frames_captured,
            capture_failures: self.counters.capture_failures,
            jobs_finalized: self.counters.jobs_finalized,
        }
    }

    async fn shutdown(mut self, ack: Option<oneshot::Sender<()>>) {
        log::info!("Controller shutting down");
        self.capture_timer.cancel();
        self.watchdog.reset();
        if let Some(sensor) = self.sensor.take() {
            sensor.release();
        }
        if let Some(job) = self.jobs.active() {
            if job.is_open() {
                log::warn!("Leaving {} open on disk, not finalizing", job.id);
            }
        }

        if !self.tasks.is_empty() {
            let grace = self.config.shutdown_grace;
            log::info!("Waiting up to {:?} for {} task(s)", grace, self.tasks.len());

            let drained = tokio::time::timeout(grace, async {
                while let Some(joined) = self.tasks.join_next().await {
                    if let Err(e) = joined {
                        log::error!("Background task failed during shutdown: {}", e);
                    }
                }
            })
            .await;

            if drained.is_err() {
                log::warn!(
                    "{} task(s) still running after {:?}, detaching",
                    self.tasks.len(),
                    grace
                );
                self.tasks.detach_all();
            }
        }

        self.state = ControllerState::Idle;
        log::info!("Controller stopped");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}
