//! Zip archives of finished job folders.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{AssemblyError, StorageError};

const PARTIAL_SUFFIX: &str = ".part";

/// Writes `<root>/<folder name>.zip` from a job folder. Entries are rooted
/// at the folder name so the archive unpacks back into the same layout.
#[derive(Debug, Clone)]
pub struct ArchiveManager {
    root: PathBuf,
}

impl ArchiveManager {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn archive_path_for(&self, folder: &Path) -> PathBuf {
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "timelapse".to_string());
        self.root.join(format!("{}.zip", name))
    }

    /// Archives `folder`. An existing archive is never overwritten. The zip
    /// is built under a temporary name and renamed into place when complete,
    /// so a visible `.zip` is always whole.
    pub fn archive(&self, folder: &Path) -> Result<PathBuf, AssemblyError> {
        let target = self.archive_path_for(folder);
        if std::fs::symlink_metadata(&target).is_ok() {
            return Err(StorageError::FileExists(target).into());
        }

        let partial = partial_path(&target);
        let written = write_zip(folder, &partial).and_then(|count| {
            if std::fs::symlink_metadata(&target).is_ok() {
                return Err(StorageError::FileExists(target.clone()).into());
            }
            std::fs::rename(&partial, &target).map_err(|e| AssemblyError::Archive {
                path: target.clone(),
                message: e.to_string(),
            })?;
            Ok(count)
        });

        match written {
            Ok(count) => {
                log::info!("Archived {} files into {}", count, target.display());
                Ok(target)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                Err(e)
            }
        }
    }

    /// Deletes a job folder after it has been archived.
    pub fn remove_folder(&self, folder: &Path) -> Result<(), AssemblyError> {
        std::fs::remove_dir_all(folder).map_err(|e| AssemblyError::RemoveFolder {
            path: folder.to_path_buf(),
            source: e,
        })?;
        log::info!("Deleted job folder {}", folder.display());
        Ok(())
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Returns the number of file entries written.
fn write_zip(folder: &Path, destination: &Path) -> Result<usize, AssemblyError> {
    let archive_err = |message: String| AssemblyError::Archive {
        path: destination.to_path_buf(),
        message,
    };

    let folder_name = folder
        .file_name()
        .ok_or_else(|| archive_err(format!("'{}' has no folder name", folder.display())))?
        .to_string_lossy()
        .into_owned();

    let file = File::create(destination).map_err(|e| archive_err(e.to_string()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated);

    let mut count = 0;
    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = entry.map_err(|e| archive_err(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(folder)
            .map_err(|e| archive_err(e.to_string()))?;
        let name = format!(
            "{}/{}",
            folder_name,
            relative.to_string_lossy().replace('\\', "/")
        );

        zip.start_file(name, options)
            .map_err(|e| archive_err(e.to_string()))?;
        let mut source = File::open(entry.path()).map_err(|e| archive_err(e.to_string()))?;
        std::io::copy(&mut source, &mut zip).map_err(|e| archive_err(e.to_string()))?;
        count += 1;
    }

    let mut writer = zip.finish().map_err(|e| archive_err(e.to_string()))?;
    writer.flush().map_err(|e| archive_err(e.to_string()))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| archive_err(e.to_string()))?;

    Ok(count)
}
