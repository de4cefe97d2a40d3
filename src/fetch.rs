//! Artifact download for lecture videos and slide decks.
//!
//! Sources hand us share links as often as direct URLs, so Google Drive
//! links are rewritten to their direct-download form before fetching.
//! Downloads stream to disk; lecture videos are too large to buffer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

/// Knobs for artifact downloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            max_retries: 3,
        }
    }
}

/// Rewrite a Google Drive share link to its direct-download form.
///
/// Handles both `/file/d/<id>/view` share links and `open?id=<id>` links.
/// Anything that is not a Drive link passes through unchanged.
pub fn normalize_share_url(url: &str) -> String {
    if !url.contains("drive.google.com") {
        return url.to_string();
    }

    let mut file_id = None;
    if let Ok(re) = Regex::new(r"/file/d/([A-Za-z0-9_-]+)") {
        if let Some(captures) = re.captures(url) {
            file_id = captures.get(1).map(|m| m.as_str().to_string());
        }
    }
    if file_id.is_none() {
        if let Ok(re) = Regex::new(r"[?&]id=([A-Za-z0-9_-]+)") {
            if let Some(captures) = re.captures(url) {
                file_id = captures.get(1).map(|m| m.as_str().to_string());
            }
        }
    }

    match file_id {
        Some(id) => format!("https://drive.google.com/uc?export=download&id={id}"),
        None => url.to_string(),
    }
}

pub struct ArtifactFetcher {
    config: FetchConfig,
    client: reqwest::Client,
}

impl ArtifactFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| PipelineError::ExternalService(format!("HTTP client setup failed: {e}")))?;
        Ok(Self { config, client })
    }

    /// Download a URL to `dest`, retrying with exponential backoff
    pub async fn download(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        let direct_url = normalize_share_url(url);
        let mut last_error = None;

        for attempt in 0..self.config.max_retries.max(1) {
            match self.download_once(&direct_url, dest).await {
                Ok(bytes) => {
                    info!("✅ Downloaded {} bytes to {}", bytes, dest.display());
                    return Ok(dest.to_path_buf());
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries.saturating_sub(1) {
                        let delay = Duration::from_secs(2_u64.pow(attempt));
                        warn!(
                            "Download attempt {} failed, retrying in {:?}",
                            attempt + 1,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PipelineError::ExternalService(format!("download failed: {direct_url}"))
        }))
    }

    async fn download_once(&self, url: &str, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!("📥 Downloading {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::ExternalService(format!("download request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::ExternalService(format!(
                "download of {url} returned {status}"
            )));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| PipelineError::ExternalService(format!("download body: {e}")))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_link_is_rewritten() {
        let url = "https://drive.google.com/file/d/1AbC_dEf-234/view?usp=sharing";
        assert_eq!(
            normalize_share_url(url),
            "https://drive.google.com/uc?export=download&id=1AbC_dEf-234"
        );
    }

    #[test]
    fn test_open_link_is_rewritten() {
        let url = "https://drive.google.com/open?id=xYz789";
        assert_eq!(
            normalize_share_url(url),
            "https://drive.google.com/uc?export=download&id=xYz789"
        );
    }

    #[test]
    fn test_non_drive_url_passes_through() {
        let url = "https://cdn.example.edu/lectures/week3.mp4";
        assert_eq!(normalize_share_url(url), url);
    }

    #[test]
    fn test_drive_url_without_id_passes_through() {
        let url = "https://drive.google.com/drive/folders/shared";
        assert_eq!(normalize_share_url(url), url);
    }
}
