pub mod folder;
pub mod listing;

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::time::Instant;

pub use folder::JobFolderManager;
pub use listing::{list_root, RootEntry};

/// Lifecycle state of a capture job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Open,
    Finalizing,
    Closed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Open => write!(f, "open"),
            JobState::Finalizing => write!(f, "finalizing"),
            JobState::Closed => write!(f, "closed"),
        }
    }
}

/// One print's capture session.
#[derive(Debug, Clone)]
pub struct Job {
    /// Folder base name, e.g. `timelapse_18-10-2026_Job2`. Unique per date.
    pub id: String,
    pub date: NaiveDate,
    pub number: u32,
    pub folder_path: PathBuf,
    pub frame_count: u32,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub last_activity: Instant,
}

impl Job {
    pub fn new(date: NaiveDate, number: u32, folder_path: PathBuf, now: Instant) -> Self {
        Self {
            id: job_folder_name(date, number),
            date,
            number,
            folder_path,
            frame_count: 0,
            state: JobState::Open,
            created_at: Utc::now(),
            last_activity: now,
        }
    }

    /// Reopens an existing folder, e.g. for a manual finalize.
    pub fn from_folder(folder_path: &Path) -> Option<Self> {
        let id = folder_path.file_name()?.to_str()?.to_string();
        let (date, number) = parse_job_folder_name(&id)?;
        Some(Self {
            id,
            date,
            number,
            folder_path: folder_path.to_path_buf(),
            frame_count: 0,
            state: JobState::Open,
            created_at: Utc::now(),
            last_activity: Instant::now(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.state == JobState::Open
    }

    pub fn frame_path(&self, sequence_number: u32) -> PathBuf {
        self.folder_path
            .join(frame_file_name(&self.id, sequence_number))
    }

    /// ffmpeg-style input pattern for this job's frames.
    pub fn frame_pattern(&self) -> String {
        format!("snapshot_{}_%06d.jpg", self.id)
    }
}

/// One captured photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub job_id: String,
    pub sequence_number: u32,
    pub captured_at: DateTime<Utc>,
    pub path: PathBuf,
}

pub fn date_stamp(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

pub fn job_folder_name(date: NaiveDate, number: u32) -> String {
    format!("timelapse_{}_Job{}", date_stamp(date), number)
}

pub fn frame_file_name(job_id: &str, sequence_number: u32) -> String {
    format!("snapshot_{}_{:06}.jpg", job_id, sequence_number)
}

pub(crate) fn parse_job_folder_name(name: &str) -> Option<(NaiveDate, u32)> {
    let rest = name.strip_prefix("timelapse_")?;
    let (date, number) = rest.rsplit_once("_Job")?;
    let date = NaiveDate::parse_from_str(date, "%d-%m-%Y").ok()?;
    let number = number.parse().ok()?;
    Some((date, number))
}
