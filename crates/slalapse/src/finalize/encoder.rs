use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::AssemblyError;

/// Longest stderr tail kept in an error.
const MAX_STDERR_LENGTH: usize = 2000;

/// What to encode and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeRequest {
    /// Directory the frame pattern is resolved in.
    pub working_dir: PathBuf,
    /// printf-style frame pattern, e.g. `snapshot_<job>_%06d.jpg`.
    pub input_pattern: String,
    pub frame_rate: u32,
    pub output: PathBuf,
}

#[async_trait]
pub trait VideoEncoder: Send + Sync {
    async fn encode(&self, request: &EncodeRequest) -> Result<(), AssemblyError>;
}

/// Runs an ffmpeg-compatible binary.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: String,
    codec: String,
    timeout: Duration,
}

impl FfmpegEncoder {
    pub fn new(binary: impl Into<String>, codec: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            codec: codec.into(),
            timeout,
        }
    }

    fn args(&self, request: &EncodeRequest) -> Vec<String> {
        let fps = request.frame_rate.to_string();
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-framerate".to_string(),
            fps.clone(),
            "-start_number".to_string(),
            "1".to_string(),
            "-i".to_string(),
            request.input_pattern.clone(),
            "-r".to_string(),
            fps,
            "-c:v".to_string(),
            self.codec.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            request.output.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn encode(&self, request: &EncodeRequest) -> Result<(), AssemblyError> {
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(&request.working_dir)
            .args(self.args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!("Running {} {:?}", self.binary, self.args(request));

        let child = cmd.spawn().map_err(|e| AssemblyError::SpawnEncoder {
            binary: self.binary.clone(),
            source: e,
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| AssemblyError::SpawnEncoder {
                binary: self.binary.clone(),
                source: e,
            })?,
            Err(_) => return Err(AssemblyError::EncoderTimeout(self.timeout.as_secs())),
        };

        if !output.status.success() {
            return Err(AssemblyError::EncoderFailed {
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        ensure_output(&request.output)
    }
}

fn ensure_output(path: &Path) -> Result<(), AssemblyError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(AssemblyError::MissingOutput(path.to_path_buf())),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(MAX_STDERR_LENGTH)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}
