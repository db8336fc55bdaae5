use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{Local, NaiveDate};
use regex::Regex;
use tokio::time::Instant;

use super::{date_stamp, job_folder_name, Frame, Job, JobState};
use crate::error::StorageError;

static RE_FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^snapshot_.+_(\d+)\.jpg$").unwrap());

const MAX_JOBS_PER_DAY: u32 = 10_000;

/// Owns job identity: folder allocation under the timelapse root, the single
/// open job, and frame numbering.
pub struct JobFolderManager {
    root: PathBuf,
    active: Option<Job>,
}

impl JobFolderManager {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            active: None,
        }
    }

    /// Points future jobs at a different root. The active job keeps its folder.
    pub fn set_root<P: AsRef<Path>>(&mut self, root: P) {
        self.root = root.as_ref().to_path_buf();
    }

    pub fn active(&self) -> Option<&Job> {
        self.active.as_ref()
    }

    pub fn has_open_job(&self) -> bool {
        self.active.as_ref().is_some_and(Job::is_open)
    }

    /// Returns the open job, allocating today's next job folder if needed.
    pub fn ensure_active_job(&mut self, now: Instant) -> Result<Job, StorageError> {
        self.ensure_active_job_on(Local::now().date_naive(), now)
    }

    pub fn ensure_active_job_on(
        &mut self,
        date: NaiveDate,
        now: Instant,
    ) -> Result<Job, StorageError> {
        if let Some(job) = &self.active {
            return Ok(job.clone());
        }

        let (number, folder_path) = self.allocate_folder(date)?;
        let job = Job::new(date, number, folder_path, now);
        log::info!("Created job folder {}", job.folder_path.display());

        self.active = Some(job.clone());
        Ok(job)
    }

    /// Creates the first free `timelapse_<date>_Job<N>` folder. Numbers whose
    /// folder or `.zip` archive already exists are skipped. `create_dir` fails
    /// on an existing path, so a concurrent creator just moves us to N+1.
    fn allocate_folder(&self, date: NaiveDate) -> Result<(u32, PathBuf), StorageError> {
        ensure_directory(&self.root)?;

        for number in 1..=MAX_JOBS_PER_DAY {
            let name = job_folder_name(date, number);
            let folder = self.root.join(&name);
            let archive = self.root.join(format!("{}.zip", name));

            if std::fs::symlink_metadata(&archive).is_ok() {
                continue;
            }

            match std::fs::create_dir(&folder) {
                Ok(()) => return Ok((number, folder)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(StorageError::CreateDirectory {
                        path: folder,
                        source: e,
                    })
                }
            }
        }

        Err(StorageError::JobNumbersExhausted {
            date: date_stamp(date),
            attempts: MAX_JOBS_PER_DAY,
        })
    }

    /// `1 +` the highest frame number already on disk for `job`.
    pub fn next_frame_number(job: &Job) -> Result<u32, StorageError> {
        scan_next_frame_number(&job.folder_path)
    }

    /// Counts a successfully written frame against the open job.
    pub fn record_frame(&mut self, frame: &Frame) -> bool {
        match &mut self.active {
            Some(job) if job.is_open() && job.id == frame.job_id => {
                job.frame_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Updates the open job's last activity time.
    pub fn touch(&mut self, at: Instant) {
        if let Some(job) = &mut self.active {
            if job.is_open() {
                job.last_activity = at;
            }
        }
    }

    /// Stops the open job accepting frames and returns a copy for finalizing.
    pub fn begin_finalizing(&mut self) -> Option<Job> {
        let job = self.active.as_mut().filter(|job| job.is_open())?;
        job.state = JobState::Finalizing;
        Some(job.clone())
    }

    /// Marks the job closed and releases it. The folder is left alone.
    pub fn close_job(&mut self, job_id: &str) -> Option<Job> {
        if self.active.as_ref().is_some_and(|job| job.id == job_id) {
            let mut job = self.active.take()?;
            job.state = JobState::Closed;
            log::info!("Closed job {} ({} frames)", job.id, job.frame_count);
            return Some(job);
        }
        None
    }

    /// Drops the active job without finalizing. Frames stay on disk.
    pub fn abandon(&mut self) -> Option<Job> {
        let job = self.active.take()?;
        log::warn!(
            "Abandoned job {} with {} frames; folder kept at {}",
            job.id,
            job.frame_count,
            job.folder_path.display()
        );
        Some(job)
    }
}

pub(crate) fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
        log::info!("Created {}", path.display());
    }
    Ok(())
}

/// Sequence numbers of the frame files in `folder`, unsorted.
pub fn scan_frame_numbers(folder: &Path) -> Result<Vec<u32>, StorageError> {
    let entries = std::fs::read_dir(folder).map_err(|e| StorageError::ReadDirectory {
        path: folder.to_path_buf(),
        source: e,
    })?;

    let numbers = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            let captures = RE_FRAME.captures(name)?;
            captures.get(1)?.as_str().parse::<u32>().ok()
        })
        .collect();

    Ok(numbers)
}

fn scan_next_frame_number(folder: &Path) -> Result<u32, StorageError> {
    let max = scan_frame_numbers(folder)?.into_iter().max().unwrap_or(0);
    Ok(max + 1)
}
