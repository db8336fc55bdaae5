//! In-memory stand-ins for the camera endpoint and the video encoder.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use slalapse::capture::SnapshotSource;
use slalapse::error::{AssemblyError, CaptureError};
use slalapse::finalize::{EncodeRequest, VideoEncoder};

pub const FAKE_JPEG: &[u8] = b"\xff\xd8fake-jpeg\xff\xd9";

/// Snapshot source with a configurable latency and failure switch. Tracks
/// how many fetches overlap.
#[derive(Default)]
pub struct FakeSnapshotSource {
    latency: Mutex<Duration>,
    failing: AtomicBool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeSnapshotSource {
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for FakeSnapshotSource {
    async fn fetch(&self) -> Result<Vec<u8>, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CaptureError::Status(503));
        }
        Ok(FAKE_JPEG.to_vec())
    }
}

/// Encoder that writes a placeholder video and records every request.
#[derive(Default)]
pub struct FakeEncoder {
    latency: Mutex<Duration>,
    failing: AtomicBool,
    requests: Mutex<Vec<EncodeRequest>>,
}

impl FakeEncoder {
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<EncodeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoEncoder for FakeEncoder {
    async fn encode(&self, request: &EncodeRequest) -> Result<(), AssemblyError> {
        self.requests.lock().unwrap().push(request.clone());

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(AssemblyError::EncoderFailed {
                code: Some(1),
                stderr: "fake encoder failure".to_string(),
            });
        }
        std::fs::write(&request.output, b"fake-video").unwrap();
        Ok(())
    }
}
