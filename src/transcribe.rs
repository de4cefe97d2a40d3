//! Lecture transcription through the hosted Whisper API.
//!
//! Audio is pulled out of the lecture video with ffmpeg at settings sized
//! for upload (mono, 16kHz, low bitrate), then sent to the transcription
//! endpoint asking for verbose segment output. The segment timings drive
//! everything downstream, so only the segments are kept.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::transcript::{Transcript, TranscriptSegment};

const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Knobs for the transcription step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// OpenAI API key used for the Whisper endpoint
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    /// Request budget in seconds; uploads of long lectures are slow
    pub timeout_seconds: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "whisper-1".to_string(),
            endpoint: OPENAI_TRANSCRIPTION_URL.to_string(),
            timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

pub struct WhisperTranscriber {
    config: TranscriptionConfig,
    client: reqwest::Client,
}

impl WhisperTranscriber {
    pub fn new(config: TranscriptionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| PipelineError::ExternalService(format!("HTTP client setup failed: {e}")))?;
        Ok(Self { config, client })
    }

    /// Transcribe a lecture video end to end: extract audio into
    /// `work_dir`, upload it, and convert the response segments.
    pub async fn transcribe_video(&self, video_path: &Path, work_dir: &Path) -> Result<Transcript> {
        let audio_path = extract_audio(video_path, work_dir).await?;
        self.transcribe_audio(&audio_path).await
    }

    /// Upload one audio file and convert the verbose response into a
    /// transcript
    pub async fn transcribe_audio(&self, audio_path: &Path) -> Result<Transcript> {
        if self.config.api_key.is_empty() {
            return Err(PipelineError::ExternalService(
                "transcription API key is not configured".to_string(),
            ));
        }

        info!("🎤 Transcribing {}", audio_path.display());

        let bytes = tokio::fs::read(audio_path).await?;
        let filename = audio_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str("audio/mpeg")
            .map_err(|e| PipelineError::ExternalService(format!("audio upload part: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json")
            .part("file", part);

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::ExternalService(format!("transcription request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::ExternalService(format!(
                "transcription API returned {status}: {body}"
            )));
        }

        let parsed: WhisperResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::ExternalService(format!("transcription response: {e}")))?;

        let segments = parsed
            .segments
            .into_iter()
            .map(|segment| TranscriptSegment {
                start: segment.start,
                end: segment.end,
                text: segment.text.trim().to_string(),
            })
            .collect::<Vec<_>>();

        info!("✅ Transcribed {} segments", segments.len());
        Ok(Transcript::new(segments))
    }
}

/// Extract mono 16kHz audio from a video, sized for upload
async fn extract_audio(video_path: &Path, output_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;

    let stem = video_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lecture".to_string());
    let audio_path = output_dir.join(format!("{stem}_audio.mp3"));

    info!("🎵 Extracting audio: {}", video_path.display());

    let output = tokio::process::Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(video_path)
        .args(["-vn", "-ar", "16000", "-ac", "1", "-b:a", "32k"])
        .arg(&audio_path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(PipelineError::Extraction {
            path: video_path.to_path_buf(),
            reason: format!(
                "ffmpeg audio extraction failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(audio_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whisper_segments_deserialize() {
        let raw = r#"{
            "task": "transcribe",
            "text": "A set is a collection. Unions combine sets.",
            "segments": [
                {"id": 0, "start": 0.0, "end": 4.2, "text": " A set is a collection. "},
                {"id": 1, "start": 4.2, "end": 8.0, "text": " Unions combine sets."}
            ]
        }"#;

        let parsed: WhisperResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.segments.len(), 2);
        assert_eq!(parsed.segments[0].start, 0.0);
        assert_eq!(parsed.segments[1].text.trim(), "Unions combine sets.");
    }

    #[test]
    fn test_response_without_segments_is_empty() {
        let parsed: WhisperResponse = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert!(parsed.segments.is_empty());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_reported() {
        let transcriber = WhisperTranscriber::new(TranscriptionConfig::default()).unwrap();
        let result = transcriber.transcribe_audio(Path::new("missing.mp3")).await;
        assert!(matches!(result, Err(PipelineError::ExternalService(_))));
    }
}
