use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::SnapshotSource;
use crate::error::CaptureError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches JPEG snapshots from an HTTP endpoint such as mjpg-streamer's
/// `?action=snapshot`.
pub struct HttpSnapshotSource {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, CaptureError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| CaptureError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    fn map_error(&self, e: reqwest::Error) -> CaptureError {
        if e.is_timeout() {
            CaptureError::Timeout(self.timeout.as_secs())
        } else {
            CaptureError::Request(e.to_string())
        }
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> Result<Vec<u8>, CaptureError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(CaptureError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.map_error(e))?;
        if body.is_empty() {
            return Err(CaptureError::EmptyBody);
        }

        Ok(body.to_vec())
    }
}
