//! Test harness for driving a controller against a temporary timelapse root.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;

use slalapse::controller::{
    ControllerConfig, ControllerHandle, JobLifecycleController, LifecycleEvent, TimestampedEvent,
};
use slalapse::finalize::FinalizeOptions;
use slalapse::sensor::{SensorConfig, SensorSource, TriggerEvent};

use super::fakes::{FakeEncoder, FakeSnapshotSource};

/// Long enough for any timer a test arms; the paused clock makes it free.
const EVENT_TIMEOUT: Duration = Duration::from_secs(3600);

pub struct TestHarness {
    temp_dir: TempDir,
    /// Timelapse root handed to the controller.
    pub root: PathBuf,
    pub snapshots: Arc<FakeSnapshotSource>,
    pub encoder: Arc<FakeEncoder>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("timelapse");

        Self {
            temp_dir,
            root,
            snapshots: Arc::new(FakeSnapshotSource::default()),
            encoder: Arc::new(FakeEncoder::default()),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// 5 s capture delay, 240 s inactivity timeout, video and archive on.
    pub fn config(&self) -> ControllerConfig {
        ControllerConfig {
            enabled: true,
            capture_delay: Duration::from_secs(5),
            inactivity_timeout: Duration::from_secs(240),
            ignore_trigger_count: 0,
            snapshot_root: self.root.clone(),
            finalize: FinalizeOptions {
                video: true,
                frame_rate: 60,
                video_extension: "mp4".to_string(),
                archive: true,
                delete_folder_after_archive: false,
            },
            shutdown_grace: Duration::from_secs(1),
        }
    }

    pub fn spawn(&self, config: ControllerConfig) -> RunningController {
        controller_events(self.controller(config).spawn())
    }

    pub fn spawn_with_sensor(
        &self,
        config: ControllerConfig,
        sensor: Box<dyn SensorSource>,
        sensor_config: &SensorConfig,
    ) -> RunningController {
        let handle = self
            .controller(config)
            .spawn_with_sensor(sensor, sensor_config)
            .expect("Failed to start sensor");
        controller_events(handle)
    }

    fn controller(&self, config: ControllerConfig) -> JobLifecycleController {
        JobLifecycleController::new(
            config,
            Arc::clone(&self.snapshots) as Arc<dyn slalapse::SnapshotSource>,
            Arc::clone(&self.encoder) as Arc<dyn slalapse::VideoEncoder>,
        )
    }

    /// Job folders under the root, sorted by name.
    pub fn job_folders(&self) -> Vec<PathBuf> {
        let mut folders: Vec<PathBuf> = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries
                .map(|e| e.unwrap().path())
                .filter(|p| p.is_dir())
                .collect(),
            Err(_) => Vec::new(),
        };
        folders.sort();
        folders
    }

    /// Frame file names in `folder`, sorted.
    pub fn frames_in(&self, folder: &Path) -> Vec<String> {
        let mut frames: Vec<String> = std::fs::read_dir(folder)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("snapshot_") && name.ends_with(".jpg"))
            .collect();
        frames.sort();
        frames
    }

    /// Files (not folders) directly under the root, sorted.
    pub fn root_files(&self) -> Vec<String> {
        let mut files: Vec<String> = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries
                .map(|e| e.unwrap().path())
                .filter(|p| p.is_file())
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        files.sort();
        files
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn controller_events(handle: ControllerHandle) -> RunningController {
    let events = handle.subscribe();
    RunningController { handle, events }
}

/// A spawned controller plus a subscription opened before any edge was sent.
pub struct RunningController {
    pub handle: ControllerHandle,
    pub events: broadcast::Receiver<TimestampedEvent>,
}

impl RunningController {
    pub async fn dark(&self) {
        self.handle.send_edge(TriggerEvent::dark()).await.unwrap();
    }

    pub async fn light(&self) {
        self.handle.send_edge(TriggerEvent::light()).await.unwrap();
    }

    /// Waits for the first event matching `predicate`, returning it.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> LifecycleEvent
    where
        F: FnMut(&LifecycleEvent) -> bool,
    {
        let events = &mut self.events;
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                match events.recv().await {
                    Ok(timestamped) if predicate(&timestamped.event) => {
                        return timestamped.event
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        panic!("event receiver lagged by {}", n)
                    }
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for lifecycle event")
    }

    /// Drains everything already queued without waiting.
    pub fn drain(&mut self) -> Vec<LifecycleEvent> {
        let mut drained = Vec::new();
        while let Ok(timestamped) = self.events.try_recv() {
            drained.push(timestamped.event);
        }
        drained
    }

    /// Lets the controller process everything sent so far.
    pub async fn settle(&self) {
        self.handle.status().await.unwrap();
    }
}
