//! What a timelapse root holds: open or abandoned job folders, archives and
//! published videos.

use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use super::folder::scan_frame_numbers;
use super::parse_job_folder_name;
use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RootEntry {
    /// Not finalized yet, or kept after finalization.
    JobFolder { name: String, path: PathBuf, frames: usize },
    Archive { name: String, path: PathBuf, bytes: u64 },
    Video { name: String, path: PathBuf, bytes: u64 },
}

impl RootEntry {
    pub fn name(&self) -> &str {
        match self {
            RootEntry::JobFolder { name, .. }
            | RootEntry::Archive { name, .. }
            | RootEntry::Video { name, .. } => name,
        }
    }
}

/// Lists job folders, `.zip` archives and `.<video_extension>` videos directly
/// under `root`, sorted by name. A missing root lists as empty.
pub fn list_root(root: &Path, video_extension: &str) -> Result<Vec<RootEntry>, StorageError> {
    if !root.exists() {
        log::debug!("Timelapse root {} does not exist yet", root.display());
        return Ok(Vec::new());
    }

    let read_err = |source: std::io::Error| StorageError::ReadDirectory {
        path: root.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| read_err(e.into()))?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let path = entry.path().to_path_buf();

        if entry.file_type().is_dir() {
            if parse_job_folder_name(&name).is_some() {
                let frames = scan_frame_numbers(&path)?.len();
                entries.push(RootEntry::JobFolder { name, path, frames });
            }
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }
        let Some((stem, extension)) = name.rsplit_once('.') else {
            continue;
        };
        let bytes = entry.metadata().map_err(|e| read_err(e.into()))?.len();

        if extension == "zip" && parse_job_folder_name(stem).is_some() {
            entries.push(RootEntry::Archive { name, path, bytes });
        } else if extension == video_extension && stem.starts_with("timelapse_") {
            entries.push(RootEntry::Video { name, path, bytes });
        }
    }

    Ok(entries)
}
