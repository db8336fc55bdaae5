//! Post-job assembly: encode the frames into a video, publish a copy at the
//! timelapse root, archive the job folder and optionally delete it.
//!
//! Every step reports its own outcome. An encoder failure stops the pipeline
//! with the folder untouched; a failed archive never deletes anything.

pub mod archive;
pub mod encoder;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info_span, Instrument};

use crate::config::Config;
use crate::error::{AssemblyError, StorageError};
use crate::job::folder::scan_frame_numbers;
use crate::job::Job;

pub use archive::ArchiveManager;
pub use encoder::{EncodeRequest, FfmpegEncoder, VideoEncoder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOptions {
    pub video: bool,
    pub frame_rate: u32,
    pub video_extension: String,
    pub archive: bool,
    pub delete_folder_after_archive: bool,
}

impl FinalizeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            video: config.video_on_finalize,
            frame_rate: config.frame_rate,
            video_extension: config.video_extension.clone(),
            archive: config.archive_on_finalize,
            delete_folder_after_archive: config.delete_folder_after_archive,
        }
    }
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum StepOutcome {
    Skipped,
    Succeeded(PathBuf),
    Failed(String),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            StepOutcome::Succeeded(path) => Some(path),
            _ => None,
        }
    }

    fn from_result(result: Result<PathBuf, AssemblyError>) -> Self {
        match result {
            Ok(path) => StepOutcome::Succeeded(path),
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }
}

/// What finalization did for one job. Partial completion is a valid outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizationResult {
    pub job_id: String,
    pub frames: usize,
    /// Video inside the job folder.
    pub video: StepOutcome,
    /// Copy of the video at the timelapse root.
    pub published_video: StepOutcome,
    pub archive: StepOutcome,
    pub folder_deleted: bool,
}

impl FinalizationResult {
    fn new(job_id: &str, frames: usize) -> Self {
        Self {
            job_id: job_id.to_string(),
            frames,
            video: StepOutcome::Skipped,
            published_video: StepOutcome::Skipped,
            archive: StepOutcome::Skipped,
            folder_deleted: false,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.video.is_failure() || self.published_video.is_failure() || self.archive.is_failure()
    }
}

/// Runs the finalization pipeline for closed-off jobs.
#[derive(Clone)]
pub struct Finalizer {
    root: PathBuf,
    options: FinalizeOptions,
    encoder: Arc<dyn VideoEncoder>,
    archiver: ArchiveManager,
}

impl Finalizer {
    pub fn new<P: AsRef<Path>>(
        root: P,
        options: FinalizeOptions,
        encoder: Arc<dyn VideoEncoder>,
    ) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            archiver: ArchiveManager::new(&root),
            root,
            options,
            encoder,
        }
    }

    pub async fn finalize(&self, job: &Job) -> FinalizationResult {
        let span = info_span!("finalize", job_id = %job.id);
        self.run(job).instrument(span).await
    }

    async fn run(&self, job: &Job) -> FinalizationResult {
        let folder = job.folder_path.clone();

        let frames = match scan_frame_numbers(&folder) {
            Ok(numbers) => numbers.len(),
            Err(e) => {
                log::error!("Cannot finalize {}: {}", job.id, e);
                let mut result = FinalizationResult::new(&job.id, 0);
                result.video = StepOutcome::Failed(e.to_string());
                return result;
            }
        };
        let mut result = FinalizationResult::new(&job.id, frames);

        if frames == 0 {
            result.folder_deleted = self
                .blocking("remove_empty_folder", {
                    let folder = folder.clone();
                    move || Ok(remove_empty_folder(&folder))
                })
                .await
                .unwrap_or(false);
            log::info!("Job {} has no frames, nothing to assemble", job.id);
            return result;
        }

        if self.options.video {
            result.video = StepOutcome::from_result(self.encode(job).await);

            let Some(video) = result.video.path().map(Path::to_path_buf) else {
                log::error!(
                    "Video assembly failed for {}, folder kept at {}",
                    job.id,
                    folder.display()
                );
                return result;
            };

            let root = self.root.clone();
            result.published_video = StepOutcome::from_result(
                self.blocking("publish_video", move || publish_video(&video, &root))
                    .await,
            );
        }

        if self.options.archive {
            let archiver = self.archiver.clone();
            let source = folder.clone();
            result.archive = StepOutcome::from_result(
                self.blocking("archive", move || archiver.archive(&source))
                    .await,
            );

            if let StepOutcome::Failed(reason) = &result.archive {
                log::error!("Archiving {} failed, folder kept: {}", job.id, reason);
            }
        }

        if self.options.delete_folder_after_archive && result.archive.is_success() {
            let archiver = self.archiver.clone();
            let source = folder.clone();
            match self
                .blocking("delete_folder", move || archiver.remove_folder(&source))
                .await
            {
                Ok(()) => result.folder_deleted = true,
                Err(e) => log::error!("{}", e),
            }
        }

        log::info!(
            "Finalized {}: {} frames, video {:?}, archive {:?}",
            job.id,
            frames,
            result.published_video,
            result.archive
        );
        result
    }

    async fn encode(&self, job: &Job) -> Result<PathBuf, AssemblyError> {
        let output = job
            .folder_path
            .join(format!("{}.{}", job.id, self.options.video_extension));
        let request = EncodeRequest {
            working_dir: job.folder_path.clone(),
            input_pattern: job.frame_pattern(),
            frame_rate: self.options.frame_rate,
            output: output.clone(),
        };

        self.encoder
            .encode(&request)
            .instrument(info_span!("encode_video", fps = request.frame_rate))
            .await?;

        log::info!("Encoded {}", output.display());
        Ok(output)
    }

    /// Runs a filesystem step off the async workers inside its own span.
    async fn blocking<T, F>(&self, step: &'static str, f: F) -> Result<T, AssemblyError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, AssemblyError> + Send + 'static,
    {
        let span = info_span!("finalize_step", step);
        tokio::task::spawn_blocking(move || {
            let _step = span.entered();
            f()
        })
        .await
        .map_err(|e| AssemblyError::Task(e.to_string()))?
    }
}

/// Copies the video into `root`, suffixing `_2`, `_3`, ... if the name is taken.
fn publish_video(video: &Path, root: &Path) -> Result<PathBuf, AssemblyError> {
    let file_name = video
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "timelapse.mp4".to_string());
    let target = resolve_conflict(root, &file_name)?;

    std::fs::copy(video, &target).map_err(|e| AssemblyError::Copy {
        from: video.to_path_buf(),
        to: target.clone(),
        source: e,
    })?;
    log::info!("Copied video to {}", target.display());
    Ok(target)
}

fn resolve_conflict(directory: &Path, filename: &str) -> Result<PathBuf, StorageError> {
    let path = directory.join(filename);
    if std::fs::symlink_metadata(&path).is_err() {
        return Ok(path);
    }

    let (base, ext) = match filename.rfind('.') {
        Some(dot) => (&filename[..dot], Some(&filename[dot..])),
        None => (filename, None),
    };

    for counter in 2..=1000 {
        let candidate = directory.join(match ext {
            Some(ext) => format!("{}_{}{}", base, counter, ext),
            None => format!("{}_{}", base, counter),
        });
        if std::fs::symlink_metadata(&candidate).is_err() {
            return Ok(candidate);
        }
    }

    Err(StorageError::FileExists(path))
}

fn remove_empty_folder(folder: &Path) -> bool {
    match std::fs::remove_dir(folder) {
        Ok(()) => {
            log::info!("Removed empty job folder {}", folder.display());
            true
        }
        Err(e) => {
            log::warn!("Keeping job folder {}: {}", folder.display(), e);
            false
        }
    }
}
