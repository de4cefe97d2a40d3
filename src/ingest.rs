//! Lecture ingest orchestration.
//!
//! One lecture goes through fetch, slide extraction, frame sampling,
//! alignment and transcription in order, leaving a mapping artifact and a
//! transcript JSON in the lecture workspace and attaching both to the
//! lecture row. Batch ingest fans out across lectures with bounded
//! concurrency and tolerates per-lecture failures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::alignment::{SlideAligner, SlideMapping};
use crate::error::{PipelineError, Result};
use crate::extraction::{MediaExtractor, TextExtractor};
use crate::fetch::ArtifactFetcher;
use crate::report::{BatchReport, UnitOutcome};
use crate::store::records::relations;
use crate::store::{Filter, RecordStore};
use crate::transcribe::WhisperTranscriber;
use crate::transcript::Transcript;

/// One lecture to ingest. Video and slides may be local paths or URLs.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub video: String,
    pub slides: String,
    /// Directory artifacts for this lecture land in
    pub workspace: PathBuf,
    /// Lecture row to attach the mapping and transcript to, when present
    pub lecture_id: Option<i64>,
}

impl IngestRequest {
    fn label(&self) -> String {
        match self.lecture_id {
            Some(id) => format!("lecture {id}"),
            None => self.video.clone(),
        }
    }
}

/// Artifacts produced by one successful ingest
#[derive(Debug)]
pub struct IngestOutcome {
    pub mapping: SlideMapping,
    pub transcript: Transcript,
    pub mapping_path: PathBuf,
    pub transcript_path: PathBuf,
}

#[derive(Clone)]
pub struct LectureIngestor {
    extractor: MediaExtractor,
    aligner: SlideAligner,
    fetcher: Arc<ArtifactFetcher>,
    transcriber: Arc<WhisperTranscriber>,
    ocr: Arc<dyn TextExtractor>,
    store: Arc<dyn RecordStore>,
}

impl LectureIngestor {
    pub fn new(
        extractor: MediaExtractor,
        aligner: SlideAligner,
        fetcher: Arc<ArtifactFetcher>,
        transcriber: Arc<WhisperTranscriber>,
        ocr: Arc<dyn TextExtractor>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            extractor,
            aligner,
            fetcher,
            transcriber,
            ocr,
            store,
        }
    }

    /// Run the full pipeline for one lecture
    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestOutcome> {
        tokio::fs::create_dir_all(&request.workspace).await?;

        info!("🚀 Ingesting {}", request.label());
        info!("📁 Workspace: {}", request.workspace.display());

        let video_path = self
            .resolve_artifact(&request.video, &request.workspace, "lecture.mp4")
            .await?;
        let pdf_path = self
            .resolve_artifact(&request.slides, &request.workspace, "slides.pdf")
            .await?;

        let deck = self
            .extractor
            .extract_slide_deck(&pdf_path, &request.workspace.join("slides"), self.ocr.as_ref())
            .await?;
        let frames = self
            .extractor
            .extract_frame_samples(&video_path, &request.workspace.join("frames"), self.ocr.as_ref())
            .await?;

        let mapping = self.aligner.align(&deck, &frames, &video_path);
        if !mapping.is_monotonic() {
            warn!(
                "slide mapping for {} is not monotonic; alignment output may be unreliable",
                request.label()
            );
        }

        let mapping_path = request.workspace.join("slide_mapping.json");
        mapping.save(&mapping_path).await?;

        if let Some(lecture_id) = request.lecture_id {
            self.store
                .update(
                    relations::LECTURES,
                    &[Filter::eq("id", lecture_id)],
                    json!({ "slide_mapping": mapping.to_value()? }),
                )
                .await?;
            info!("💾 Attached slide mapping to lecture {}", lecture_id);
        }

        let transcript = self
            .transcriber
            .transcribe_video(&video_path, &request.workspace)
            .await?;
        let transcript_path = request.workspace.join("transcript.json");
        transcript.save(&transcript_path).await?;

        if let Some(lecture_id) = request.lecture_id {
            self.store
                .update(
                    relations::LECTURES,
                    &[Filter::eq("id", lecture_id)],
                    json!({ "transcript": serde_json::to_value(&transcript)? }),
                )
                .await?;
            info!("💾 Attached transcript to lecture {}", lecture_id);
        }

        info!(
            "🎉 Ingested {}: {}/{} slides placed, {} transcript segments",
            request.label(),
            mapping.slide_timestamps.len(),
            mapping.total_slides,
            transcript.segments.len()
        );

        Ok(IngestOutcome {
            mapping,
            transcript,
            mapping_path,
            transcript_path,
        })
    }

    /// Ingest several lectures with bounded concurrency, one outcome per
    /// lecture
    pub async fn ingest_batch(&self, requests: Vec<IngestRequest>, workers: usize) -> BatchReport {
        if requests.is_empty() {
            return BatchReport::new();
        }

        let total = requests.len();
        info!("🚀 Batch ingest: {} lectures, {} workers", total, workers);

        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let (tx, mut rx) = mpsc::channel(total);

        for (index, request) in requests.into_iter().enumerate() {
            let ingestor = self.clone();
            let tx = tx.clone();
            let semaphore = Arc::clone(&semaphore);

            tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();

                info!("📝 Ingesting lecture {}/{}", index + 1, total);
                let unit = request.label();
                let outcome = match ingestor.ingest(&request).await {
                    Ok(outcome) => UnitOutcome::completed(
                        unit,
                        format!(
                            "{}/{} slides placed, {} transcript segments",
                            outcome.mapping.slide_timestamps.len(),
                            outcome.mapping.total_slides,
                            outcome.transcript.segments.len()
                        ),
                    ),
                    Err(e) => UnitOutcome::failed(unit, e.to_string()),
                };

                if let Err(e) = tx.send(outcome).await {
                    error!("Failed to send ingest outcome: {}", e);
                }
            });
        }

        // Close the channel once all tasks have finished
        drop(tx);

        let mut report = BatchReport::new();
        while let Some(outcome) = rx.recv().await {
            match &outcome {
                UnitOutcome::Completed { unit, detail } => info!("✅ {}: {}", unit, detail),
                UnitOutcome::Skipped { unit, reason } => info!("{} skipped: {}", unit, reason),
                UnitOutcome::Failed { unit, reason } => warn!("❌ {} failed: {}", unit, reason),
            }
            report.record(outcome);
        }

        info!("📊 Batch ingest: {}", report);
        report
    }

    /// Local paths are used in place; URLs are downloaded into the
    /// workspace under `default_name`.
    async fn resolve_artifact(
        &self,
        source: &str,
        workspace: &Path,
        default_name: &str,
    ) -> Result<PathBuf> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let dest = workspace.join(default_name);
            return self.fetcher.download(source, &dest).await;
        }

        let path = PathBuf::from(source);
        if !path.exists() {
            return Err(PipelineError::Extraction {
                path,
                reason: "file not found".to_string(),
            });
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::AlignerConfig;
    use crate::config::ExtractionConfig;
    use crate::extraction::TesseractExtractor;
    use crate::fetch::FetchConfig;
    use crate::store::memory::InMemoryStore;
    use crate::transcribe::TranscriptionConfig;

    fn ingestor(store: Arc<InMemoryStore>) -> LectureIngestor {
        LectureIngestor::new(
            MediaExtractor::new(ExtractionConfig::default()),
            SlideAligner::new(AlignerConfig::default()),
            Arc::new(ArtifactFetcher::new(FetchConfig::default()).unwrap()),
            Arc::new(WhisperTranscriber::new(TranscriptionConfig::default()).unwrap()),
            Arc::new(TesseractExtractor::default()),
            store,
        )
    }

    fn request(workspace: PathBuf, lecture_id: Option<i64>) -> IngestRequest {
        IngestRequest {
            video: "/nonexistent/lecture.mp4".to_string(),
            slides: "/nonexistent/slides.pdf".to_string(),
            workspace,
            lecture_id,
        }
    }

    #[test]
    fn test_label_prefers_lecture_id() {
        let request = request(PathBuf::from("ws"), Some(12));
        assert_eq!(request.label(), "lecture 12");

        let anonymous = IngestRequest {
            lecture_id: None,
            ..request
        };
        assert_eq!(anonymous.label(), "/nonexistent/lecture.mp4");
    }

    #[tokio::test]
    async fn test_missing_local_artifact_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(Arc::new(InMemoryStore::new()));

        let result = ingestor.ingest(&request(dir.path().join("ws"), None)).await;
        assert!(matches!(result, Err(PipelineError::Extraction { .. })));
    }

    #[tokio::test]
    async fn test_batch_records_per_lecture_failures() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor(Arc::new(InMemoryStore::new()));
        let requests = vec![
            request(dir.path().join("a"), Some(1)),
            request(dir.path().join("b"), Some(2)),
        ];

        let report = ingestor.ingest_batch(requests, 2).await;
        assert_eq!(report.failed(), 2);
        assert_eq!(report.completed(), 0);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_empty_batch_is_clean() {
        let ingestor = ingestor(Arc::new(InMemoryStore::new()));
        let report = ingestor.ingest_batch(Vec::new(), 4).await;
        assert!(report.outcomes.is_empty());
        assert!(report.is_clean());
    }
}
