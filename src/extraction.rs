//! Media and document extraction: frame sampling, slide rendering, text
//! extraction.
//!
//! External tools do the heavy lifting: `ffmpeg`/`ffprobe` for video,
//! `pdftoppm` for page rendering, `tesseract` for OCR. Native PDF text is
//! read in-process via `lopdf` and OCR only fills in for image-only pages.

use crate::config::ExtractionConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use lopdf::Document;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One slide of a deck: rendered image plus extracted text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slide {
    /// 0-based position in the deck
    pub index: usize,
    /// Rendered page image
    pub image_path: PathBuf,
    /// Extracted text; may be empty for purely visual slides
    pub text: String,
}

/// An extracted slide deck, ordered by slide index. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideDeck {
    pub source_pdf: PathBuf,
    pub slides: Vec<Slide>,
}

impl SlideDeck {
    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }
}

/// One sampled video frame with its extracted text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSample {
    /// Seconds from the start of the video
    pub timestamp: f64,
    /// Extracted text; samples with no legible text are dropped before
    /// alignment
    pub text: String,
}

/// OCR collaborator: image in, text out. Unreadable input yields an empty
/// string, never an error.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image: &Path) -> String;
}

/// Tesseract CLI OCR backend
pub struct TesseractExtractor {
    language: String,
}

impl TesseractExtractor {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

impl Default for TesseractExtractor {
    fn default() -> Self {
        Self::new("eng")
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract_text(&self, image: &Path) -> String {
        let output = tokio::process::Command::new("tesseract")
            .arg(image)
            .arg("stdout")
            .args(["-l", &self.language])
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            }
            Ok(output) => {
                warn!(
                    "tesseract exited with {} for {}",
                    output.status,
                    image.display()
                );
                String::new()
            }
            Err(e) => {
                warn!("tesseract not runnable: {}", e);
                String::new()
            }
        }
    }
}

/// Frame and slide extraction driven by external tools
#[derive(Debug, Clone)]
pub struct MediaExtractor {
    config: ExtractionConfig,
}

impl MediaExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Video duration in seconds via ffprobe
    pub async fn probe_duration(&self, video_path: &Path) -> Result<f64> {
        let output = tokio::process::Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(video_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(PipelineError::Extraction {
                path: video_path.to_path_buf(),
                reason: "ffprobe failed".to_string(),
            });
        }

        let data: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        data["format"]["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok())
            .ok_or_else(|| PipelineError::Extraction {
                path: video_path.to_path_buf(),
                reason: "no duration in ffprobe output".to_string(),
            })
    }

    /// Sample one frame every `frame_interval_seconds` into `output_dir`.
    /// Returns (timestamp, image path) pairs in timestamp order.
    pub async fn sample_frames(
        &self,
        video_path: &Path,
        output_dir: &Path,
    ) -> Result<Vec<(f64, PathBuf)>> {
        tokio::fs::create_dir_all(output_dir).await?;

        let interval = self.config.frame_interval_seconds;
        let pattern = output_dir.join("frame_%05d.jpg");

        info!(
            "🎞️ Sampling {} every {:.1}s",
            video_path.display(),
            interval
        );

        let status = tokio::process::Command::new("ffmpeg")
            .arg("-i")
            .arg(video_path)
            .args([
                "-vf",
                &format!("fps=1/{}", interval),
                "-q:v",
                "2",
                "-y",
            ])
            .arg(&pattern)
            .status()
            .await?;

        if !status.success() {
            return Err(PipelineError::Extraction {
                path: video_path.to_path_buf(),
                reason: "ffmpeg frame sampling failed".to_string(),
            });
        }

        let mut frames = Vec::new();
        let mut entries = tokio::fs::read_dir(output_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("frame_") && name.ends_with(".jpg") {
                frames.push(path);
            }
        }
        frames.sort();

        // frame_00001.jpg is the t=0 sample; each later file advances one
        // interval
        let samples = frames
            .into_iter()
            .enumerate()
            .map(|(i, path)| (i as f64 * interval, path))
            .collect();

        Ok(samples)
    }

    /// Render PDF pages as JPEG images via pdftoppm, in page order
    pub async fn render_slides(&self, pdf_path: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(output_dir).await?;

        let prefix = output_dir.join("slide");

        let status = tokio::process::Command::new("pdftoppm")
            .args(["-jpeg", "-r", &self.config.render_dpi.to_string()])
            .arg(pdf_path)
            .arg(&prefix)
            .status()
            .await?;

        if !status.success() {
            return Err(PipelineError::Extraction {
                path: pdf_path.to_path_buf(),
                reason: "pdftoppm rendering failed".to_string(),
            });
        }

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(output_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("slide") && name.ends_with(".jpg") {
                pages.push(path);
            }
        }
        // pdftoppm zero-pads page numbers, so lexical order is page order
        pages.sort();

        Ok(pages)
    }

    /// Native text per page via lopdf. A page with no text layer yields an
    /// empty string.
    pub fn native_page_texts(&self, pdf_path: &Path) -> Result<Vec<String>> {
        let doc = Document::load(pdf_path).map_err(|e| PipelineError::Extraction {
            path: pdf_path.to_path_buf(),
            reason: format!("PDF load failed: {}", e),
        })?;

        let mut texts = Vec::new();
        for (page_num, _) in doc.get_pages() {
            let text = doc.extract_text(&[page_num]).unwrap_or_default();
            texts.push(text.trim().to_string());
        }

        Ok(texts)
    }

    /// Full document text, pages joined by newlines. Used for homework
    /// documents where page boundaries do not matter.
    pub fn pdf_text(&self, pdf_path: &Path) -> Result<String> {
        let texts = self.native_page_texts(pdf_path)?;
        Ok(texts.join("\n"))
    }

    /// Extract a full slide deck: render every page and attach its text,
    /// preferring the native text layer and falling back to OCR for
    /// image-only pages.
    pub async fn extract_slide_deck(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
        ocr: &dyn TextExtractor,
    ) -> Result<SlideDeck> {
        let images = self.render_slides(pdf_path, output_dir).await?;
        let native_texts = self.native_page_texts(pdf_path)?;

        let mut slides = Vec::with_capacity(images.len());
        let mut ocr_pages = 0;

        for (index, image_path) in images.into_iter().enumerate() {
            let native = native_texts.get(index).cloned().unwrap_or_default();
            let text = if native.is_empty() {
                ocr_pages += 1;
                ocr.extract_text(&image_path).await
            } else {
                native
            };

            debug!("slide {}: {} chars of text", index + 1, text.len());
            slides.push(Slide {
                index,
                image_path,
                text,
            });
        }

        info!(
            "📑 Extracted {} slides from {} ({} needed OCR)",
            slides.len(),
            pdf_path.display(),
            ocr_pages
        );

        Ok(SlideDeck {
            source_pdf: pdf_path.to_path_buf(),
            slides,
        })
    }

    /// Sample frames and OCR each one, dropping samples with no legible
    /// text.
    pub async fn extract_frame_samples(
        &self,
        video_path: &Path,
        scratch_dir: &Path,
        ocr: &dyn TextExtractor,
    ) -> Result<Vec<FrameSample>> {
        let sampled = self.sample_frames(video_path, scratch_dir).await?;
        let total = sampled.len();

        let mut samples = Vec::new();
        for (timestamp, path) in sampled {
            let text = ocr.extract_text(&path).await;
            if text.is_empty() {
                continue;
            }
            samples.push(FrameSample { timestamp, text });
        }

        info!(
            "🔍 {} of {} sampled frames carry legible text",
            samples.len(),
            total
        );

        Ok(samples)
    }

    /// OCR a directory of already-sampled frame images, name-ordered, with
    /// timestamps derived from position and the configured interval.
    pub async fn frame_samples_from_dir(
        &self,
        frames_dir: &Path,
        ocr: &dyn TextExtractor,
    ) -> Result<Vec<FrameSample>> {
        let mut frames = Vec::new();
        let mut entries = tokio::fs::read_dir(frames_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".jpg") || name.ends_with(".jpeg") || name.ends_with(".png") {
                frames.push(path);
            }
        }
        frames.sort();
        let total = frames.len();

        let interval = self.config.frame_interval_seconds;
        let mut samples = Vec::new();
        for (i, path) in frames.into_iter().enumerate() {
            let text = ocr.extract_text(&path).await;
            if text.is_empty() {
                continue;
            }
            samples.push(FrameSample {
                timestamp: i as f64 * interval,
                text,
            });
        }

        info!(
            "🔍 {} of {} frames in {} carry legible text",
            samples.len(),
            total,
            frames_dir.display()
        );

        Ok(samples)
    }
}

/// Names of required external tools that are not runnable on this host
pub async fn missing_dependencies() -> Vec<&'static str> {
    let mut missing = Vec::new();
    for tool in ["ffmpeg", "ffprobe", "pdftoppm", "tesseract"] {
        let available = tokio::process::Command::new(tool)
            .arg("-v")
            .output()
            .await
            .is_ok();
        if !available {
            missing.push(tool);
        }
    }
    missing
}
