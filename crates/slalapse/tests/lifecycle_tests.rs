//! End-to-end controller behavior on a paused clock.

mod common;

use std::time::Duration;

use tokio::time::{sleep, Instant};

use common::{TestHarness, FAKE_JPEG};
use slalapse::controller::{ControllerState, LifecycleEvent};
use slalapse::finalize::StepOutcome;
use slalapse::sensor::{ChannelSensor, SensorConfig};
use slalapse::{ControllerError, DarkLevel};

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn folder_name(path: &std::path::Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

#[tokio::test(start_paused = true)]
async fn test_dark_edge_captures_one_frame_after_delay() {
    let harness = TestHarness::new();
    let mut ctl = harness.spawn(harness.config());
    let start = Instant::now();

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::JobStarted { .. }))
        .await;
    let LifecycleEvent::FrameCaptured {
        job_id,
        sequence_number,
        path,
    } = ctl
        .wait_for(|e| matches!(e, LifecycleEvent::FrameCaptured { .. }))
        .await
    else {
        unreachable!()
    };

    assert!(Instant::now() - start >= secs(5));
    assert_eq!(sequence_number, 1);
    assert!(path.ends_with(format!("snapshot_{}_000001.jpg", job_id)));
    assert_eq!(std::fs::read(&path).unwrap(), FAKE_JPEG);

    let folders = harness.job_folders();
    assert_eq!(folders.len(), 1);
    assert!(folder_name(&folders[0]).starts_with("timelapse_"));
    assert!(folder_name(&folders[0]).ends_with("_Job1"));

    let status = ctl.handle.status().await.unwrap();
    assert_eq!(status.state, ControllerState::Armed);
    assert_eq!(status.frames_captured, 1);
    assert_eq!(status.active_job.unwrap().frame_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_light_before_delay_cancels_capture() {
    let harness = TestHarness::new();
    let mut ctl = harness.spawn(harness.config());

    ctl.dark().await;
    sleep(secs(2)).await;
    ctl.light().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::CaptureCancelled { .. }))
        .await;

    sleep(secs(30)).await;

    assert_eq!(harness.snapshots.calls(), 0);
    let folders = harness.job_folders();
    assert_eq!(folders.len(), 1);
    assert!(harness.frames_in(&folders[0]).is_empty());

    let status = ctl.handle.status().await.unwrap();
    assert_eq!(status.state, ControllerState::Armed);
    assert!(!status.capture_pending);
}

#[tokio::test(start_paused = true)]
async fn test_leading_triggers_are_ignored() {
    let harness = TestHarness::new();
    let mut config = harness.config();
    config.ignore_trigger_count = 2;
    let mut ctl = harness.spawn(config);

    for _ in 0..2 {
        ctl.dark().await;
        ctl.light().await;
    }
    ctl.settle().await;

    assert!(harness.job_folders().is_empty());
    let ignored = ctl
        .drain()
        .into_iter()
        .filter(|e| matches!(e, LifecycleEvent::TriggerIgnored { .. }))
        .count();
    assert_eq!(ignored, 2);
    assert!(!ctl.handle.status().await.unwrap().ignoring_triggers);

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::FrameCaptured { .. }))
        .await;
    assert_eq!(harness.job_folders().len(), 1);
    assert_eq!(harness.snapshots.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_dark_edges_schedule_one_capture() {
    let harness = TestHarness::new();
    let mut ctl = harness.spawn(harness.config());

    ctl.dark().await;
    sleep(secs(1)).await;
    ctl.dark().await;
    sleep(secs(1)).await;
    ctl.dark().await;

    ctl.wait_for(|e| matches!(e, LifecycleEvent::FrameCaptured { .. }))
        .await;
    sleep(secs(30)).await;

    assert_eq!(harness.snapshots.calls(), 1);
    assert_eq!(harness.frames_in(&harness.job_folders()[0]).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fast_edges_never_overlap_captures() {
    let harness = TestHarness::new();
    harness.snapshots.set_latency(secs(3));
    let mut config = harness.config();
    config.capture_delay = secs(1);
    let ctl = harness.spawn(config);

    for _ in 0..20 {
        ctl.dark().await;
        sleep(Duration::from_millis(1200)).await;
        ctl.light().await;
        sleep(Duration::from_millis(100)).await;
    }
    sleep(secs(10)).await;

    assert!(harness.snapshots.calls() >= 1);
    assert_eq!(harness.snapshots.max_in_flight(), 1);

    let frames = harness.frames_in(&harness.job_folders()[0]);
    assert_eq!(frames.len(), harness.snapshots.calls());
    for (i, name) in frames.iter().enumerate() {
        assert!(name.ends_with(&format!("_{:06}.jpg", i + 1)), "{}", name);
    }
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_finalizes_exactly_once() {
    let harness = TestHarness::new();
    let mut ctl = harness.spawn(harness.config());
    let start = Instant::now();

    ctl.dark().await;
    let LifecycleEvent::JobFinalized { result } = ctl
        .wait_for(|e| matches!(e, LifecycleEvent::JobFinalized { .. }))
        .await
    else {
        unreachable!()
    };

    assert!(Instant::now() - start >= secs(240));
    assert_eq!(result.frames, 1);
    assert!(result.video.is_success());
    assert!(result.archive.is_success());
    assert!(!result.folder_deleted);

    let zip_name = format!("{}.zip", result.job_id);
    let video_name = format!("{}.mp4", result.job_id);
    assert_eq!(harness.root_files(), vec![video_name, zip_name]);
    assert_eq!(harness.encoder.requests().len(), 1);

    sleep(secs(1000)).await;
    let again = ctl
        .drain()
        .into_iter()
        .filter(|e| matches!(e, LifecycleEvent::JobFinalized { .. }))
        .count();
    assert_eq!(again, 0);

    let status = ctl.handle.status().await.unwrap();
    assert_eq!(status.state, ControllerState::Idle);
    assert_eq!(status.jobs_finalized, 1);
    assert!(status.active_job.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_activity_postpones_finalization() {
    let harness = TestHarness::new();
    let mut ctl = harness.spawn(harness.config());
    let start = Instant::now();

    ctl.dark().await;
    sleep(secs(10)).await;
    ctl.light().await;
    sleep(secs(190)).await;
    ctl.dark().await;

    let LifecycleEvent::JobFinalized { result } = ctl
        .wait_for(|e| matches!(e, LifecycleEvent::JobFinalized { .. }))
        .await
    else {
        unreachable!()
    };

    assert!(Instant::now() - start >= secs(440));
    assert_eq!(result.frames, 2);
}

#[tokio::test(start_paused = true)]
async fn test_finalization_waits_for_capture_in_flight() {
    let harness = TestHarness::new();
    harness.snapshots.set_latency(secs(10));
    let mut config = harness.config();
    config.capture_delay = secs(1);
    config.inactivity_timeout = secs(5);
    let mut ctl = harness.spawn(config);

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::FinalizeDeferred { .. }))
        .await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::FrameCaptured { .. }))
        .await;
    let LifecycleEvent::JobFinalized { result } = ctl
        .wait_for(|e| matches!(e, LifecycleEvent::JobFinalized { .. }))
        .await
    else {
        unreachable!()
    };

    assert_eq!(result.frames, 1);
    assert_eq!(harness.encoder.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_next_job_takes_next_number() {
    let harness = TestHarness::new();
    let mut config = harness.config();
    config.finalize.delete_folder_after_archive = true;
    let mut ctl = harness.spawn(config);

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::JobFinalized { .. }))
        .await;
    assert!(harness.job_folders().is_empty());

    ctl.dark().await;
    let LifecycleEvent::JobStarted { folder, .. } = ctl
        .wait_for(|e| matches!(e, LifecycleEvent::JobStarted { .. }))
        .await
    else {
        unreachable!()
    };

    // Job1 only survives as an archive; its number is still taken.
    assert!(folder_name(&folder).ends_with("_Job2"));
}

#[tokio::test(start_paused = true)]
async fn test_edges_dropped_while_finalizing() {
    let harness = TestHarness::new();
    harness.encoder.set_latency(secs(60));
    let mut ctl = harness.spawn(harness.config());

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::FinalizeStarted { .. }))
        .await;

    ctl.dark().await;
    let status = ctl.handle.status().await.unwrap();
    assert_eq!(status.state, ControllerState::Finalizing);
    assert!(!status.capture_pending);

    ctl.wait_for(|e| matches!(e, LifecycleEvent::JobFinalized { .. }))
        .await;
    sleep(secs(30)).await;

    assert_eq!(harness.snapshots.calls(), 1);
    assert_eq!(harness.job_folders().len(), 1);
    assert_eq!(
        ctl.handle.status().await.unwrap().state,
        ControllerState::Idle
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_encode_keeps_folder_and_closes_job() {
    let harness = TestHarness::new();
    harness.encoder.set_failing(true);
    let mut ctl = harness.spawn(harness.config());

    ctl.dark().await;
    let LifecycleEvent::JobFinalized { result } = ctl
        .wait_for(|e| matches!(e, LifecycleEvent::JobFinalized { .. }))
        .await
    else {
        unreachable!()
    };

    assert!(result.video.is_failure());
    assert_eq!(result.archive, StepOutcome::Skipped);
    assert!(harness.root_files().is_empty());
    assert_eq!(harness.frames_in(&harness.job_folders()[0]).len(), 1);
    assert_eq!(
        ctl.handle.status().await.unwrap().state,
        ControllerState::Idle
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_frame_job_removes_empty_folder() {
    let harness = TestHarness::new();
    let mut ctl = harness.spawn(harness.config());

    ctl.dark().await;
    ctl.light().await;
    let LifecycleEvent::JobFinalized { result } = ctl
        .wait_for(|e| matches!(e, LifecycleEvent::JobFinalized { .. }))
        .await
    else {
        unreachable!()
    };

    assert_eq!(result.frames, 0);
    assert!(result.folder_deleted);
    assert!(harness.job_folders().is_empty());
    assert!(harness.encoder.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_capture_failure_is_recovered() {
    let harness = TestHarness::new();
    harness.snapshots.set_failing(true);
    let mut ctl = harness.spawn(harness.config());

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::CaptureFailed { .. }))
        .await;

    let status = ctl.handle.status().await.unwrap();
    assert_eq!(status.capture_failures, 1);
    assert_eq!(status.state, ControllerState::Armed);
    assert!(harness.frames_in(&harness.job_folders()[0]).is_empty());

    harness.snapshots.set_failing(false);
    ctl.light().await;
    ctl.dark().await;
    let LifecycleEvent::FrameCaptured {
        sequence_number, ..
    } = ctl
        .wait_for(|e| matches!(e, LifecycleEvent::FrameCaptured { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(sequence_number, 1);
}

#[tokio::test(start_paused = true)]
async fn test_folder_allocation_failure_drops_trigger() {
    let harness = TestHarness::new();
    std::fs::write(&harness.root, b"not a directory").unwrap();
    let mut ctl = harness.spawn(harness.config());

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::JobAllocationFailed { .. }))
        .await;
    sleep(secs(30)).await;

    assert_eq!(harness.snapshots.calls(), 0);
    let status = ctl.handle.status().await.unwrap();
    assert_eq!(status.state, ControllerState::Idle);
    assert!(status.active_job.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_disable_abandons_job_without_finalizing() {
    let harness = TestHarness::new();
    let mut ctl = harness.spawn(harness.config());

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::FrameCaptured { .. }))
        .await;

    ctl.handle.disable().await.unwrap();
    ctl.wait_for(|e| matches!(e, LifecycleEvent::JobAbandoned { frames: 1, .. }))
        .await;

    ctl.dark().await;
    sleep(secs(1000)).await;

    assert!(harness.encoder.requests().is_empty());
    assert_eq!(harness.job_folders().len(), 1);
    assert_eq!(harness.frames_in(&harness.job_folders()[0]).len(), 1);
    let status = ctl.handle.status().await.unwrap();
    assert!(!status.enabled);
    assert_eq!(status.state, ControllerState::Idle);

    ctl.handle.enable().await.unwrap();
    ctl.dark().await;
    let LifecycleEvent::JobStarted { folder, .. } = ctl
        .wait_for(|e| matches!(e, LifecycleEvent::JobStarted { .. }))
        .await
    else {
        unreachable!()
    };
    assert!(folder_name(&folder).ends_with("_Job2"));
}

#[tokio::test(start_paused = true)]
async fn test_reload_applies_timings_and_resets_ignore_count() {
    let harness = TestHarness::new();
    let mut ctl = harness.spawn(harness.config());

    let mut config = harness.config();
    config.capture_delay = secs(2);
    config.ignore_trigger_count = 1;
    ctl.handle.reload(config).await.unwrap();
    ctl.wait_for(|e| matches!(e, LifecycleEvent::ConfigReloaded))
        .await;

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::TriggerIgnored { count: 1, limit: 1 }))
        .await;
    ctl.light().await;

    let start = Instant::now();
    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::FrameCaptured { .. }))
        .await;
    let elapsed = Instant::now() - start;
    assert!(elapsed >= secs(2) && elapsed < secs(5), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_ignore_count_applies_per_job() {
    let harness = TestHarness::new();
    let mut config = harness.config();
    config.ignore_trigger_count = 1;
    let mut ctl = harness.spawn(config);

    ctl.dark().await;
    ctl.light().await;
    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::JobFinalized { .. }))
        .await;

    // Back in idle the next job ignores its own leading edge.
    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::TriggerIgnored { .. }))
        .await;
    ctl.settle().await;
    assert_eq!(
        ctl.handle.status().await.unwrap().state,
        ControllerState::Idle
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_capture() {
    let harness = TestHarness::new();
    let mut ctl = harness.spawn(harness.config());

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::CaptureScheduled { .. }))
        .await;
    ctl.handle.shutdown().await.unwrap();

    sleep(secs(30)).await;
    assert_eq!(harness.snapshots.calls(), 0);
    assert!(matches!(
        ctl.handle.status().await,
        Err(ControllerError::NotRunning)
    ));
    // Frames stay on disk; nothing is finalized on shutdown.
    assert_eq!(harness.job_folders().len(), 1);
    assert!(harness.root_files().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_detaches_slow_tasks_after_grace() {
    let harness = TestHarness::new();
    harness.snapshots.set_latency(secs(600));
    let mut ctl = harness.spawn(harness.config());

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::CaptureScheduled { .. }))
        .await;
    sleep(secs(6)).await;

    let start = Instant::now();
    ctl.handle.shutdown().await.unwrap();
    let waited = Instant::now() - start;

    assert!(waited >= secs(1) && waited < secs(600), "{:?}", waited);
}

#[tokio::test(start_paused = true)]
async fn test_sensor_levels_drive_capture() {
    let harness = TestHarness::new();
    let (sensor, raw) = ChannelSensor::new(false);
    let sensor_config = SensorConfig {
        dark_level: DarkLevel::High,
        debounce: Duration::from_millis(300),
        poll_interval: Duration::from_millis(20),
    };
    let mut ctl = harness.spawn_with_sensor(harness.config(), Box::new(sensor), &sensor_config);

    // Bounce, then settle dark.
    raw.set(true);
    raw.set(false);
    raw.set(true);

    ctl.wait_for(|e| matches!(e, LifecycleEvent::FrameCaptured { .. }))
        .await;
    assert_eq!(harness.snapshots.calls(), 1);

    ctl.handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_huge_timings_do_not_stop_controller() {
    let harness = TestHarness::new();
    let mut config = harness.config();
    config.capture_delay = Duration::from_secs(u64::MAX - 1);
    config.inactivity_timeout = Duration::from_secs(u64::MAX);
    let mut ctl = harness.spawn(config);

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::CaptureScheduled { .. }))
        .await;
    sleep(secs(3600)).await;

    let status = ctl.handle.status().await.unwrap();
    assert_eq!(status.state, ControllerState::Capturing);
    assert_eq!(harness.snapshots.calls(), 0);

    ctl.light().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::CaptureCancelled { .. }))
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_reload_during_job_keeps_triggers_flowing() {
    let harness = TestHarness::new();
    let mut config = harness.config();
    config.ignore_trigger_count = 1;
    let mut ctl = harness.spawn(config.clone());

    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::TriggerIgnored { .. }))
        .await;
    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::FrameCaptured { .. }))
        .await;

    ctl.handle.reload(config.clone()).await.unwrap();
    ctl.wait_for(|e| matches!(e, LifecycleEvent::ConfigReloaded))
        .await;
    assert!(!ctl.handle.status().await.unwrap().ignoring_triggers);

    let mut raised = config;
    raised.ignore_trigger_count = 2;
    raised.finalize.frame_rate = 30;
    ctl.handle.reload(raised).await.unwrap();
    ctl.wait_for(|e| matches!(e, LifecycleEvent::ConfigReloaded))
        .await;
    assert!(!ctl.handle.status().await.unwrap().ignoring_triggers);

    ctl.light().await;
    ctl.dark().await;
    ctl.wait_for(|e| matches!(e, LifecycleEvent::CaptureScheduled { .. }))
        .await;
    let LifecycleEvent::FrameCaptured {
        sequence_number, ..
    } = ctl
        .wait_for(|e| matches!(e, LifecycleEvent::FrameCaptured { .. }))
        .await
    else {
        unreachable!()
    };
    assert_eq!(sequence_number, 2);

    // The raised limit applies from the next job on.
    ctl.wait_for(|e| matches!(e, LifecycleEvent::JobFinalized { .. }))
        .await;
    let status = ctl.handle.status().await.unwrap();
    assert_eq!(status.state, ControllerState::Idle);
    assert!(status.ignoring_triggers);
}
