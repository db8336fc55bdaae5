//! Snapshot capture: fetch one frame and persist it under the active job.

pub mod http;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{CaptureError, StorageError};
use crate::job::{Frame, Job, JobFolderManager};

pub use http::HttpSnapshotSource;

/// Attempts to claim a frame number before giving up on a contended folder.
const MAX_CLAIM_ATTEMPTS: u32 = 8;

/// Where frame bytes come from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Fetches a snapshot and writes it as the job's next frame.
#[derive(Clone)]
pub struct SnapshotCapturer {
    source: Arc<dyn SnapshotSource>,
}

impl SnapshotCapturer {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self { source }
    }

    pub async fn capture(&self, job: &Job) -> Result<Frame, CaptureError> {
        let bytes = self.source.fetch().await?;

        let job = job.clone();
        let frame = tokio::task::spawn_blocking(move || write_frame(&job, &bytes))
            .await
            .map_err(|e| CaptureError::Task(e.to_string()))??;

        log::info!(
            "Captured frame {} for {} ({})",
            frame.sequence_number,
            frame.job_id,
            frame.path.display()
        );
        Ok(frame)
    }
}

/// Writes `bytes` under the next free frame number. The file is created
/// exclusively; a number taken in the meantime triggers a rescan.
fn write_frame(job: &Job, bytes: &[u8]) -> Result<Frame, CaptureError> {
    for _ in 0..MAX_CLAIM_ATTEMPTS {
        let sequence_number = JobFolderManager::next_frame_number(job)?;
        let path = job.frame_path(sequence_number);

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(StorageError::WriteFile { path, source: e }.into()),
        };

        if let Err(e) = file.write_all(bytes).and_then(|_| file.sync_all()) {
            drop(file);
            remove_partial(&path);
            return Err(StorageError::WriteFile { path, source: e }.into());
        }

        return Ok(Frame {
            job_id: job.id.clone(),
            sequence_number,
            captured_at: Utc::now(),
            path,
        });
    }

    Err(StorageError::FileExists(job.folder_path.clone()).into())
}

fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        log::warn!("Failed to remove partial frame '{}': {}", path.display(), e);
    }
}
