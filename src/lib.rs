//! Lecture Companion - backend library
//!
//! Aligns slide decks to lecture recordings by fuzzy text matching,
//! assembles timestamp-scoped context (slides shown so far plus transcript
//! prefix), generates and grades quiz questions against that context, and
//! aggregates per-answer misconceptions into instructor-facing insights.

pub mod alignment;
pub mod config;
pub mod context;
pub mod error;
pub mod extraction;
pub mod fetch;
pub mod generation;
pub mod grading;
pub mod ingest;
pub mod insights;
pub mod llm;
pub mod parsing;
pub mod report;
pub mod store;
pub mod topics;
pub mod transcribe;
pub mod transcript;

// Re-export main types for easy access
pub use crate::alignment::{AlignerConfig, SlideAligner, SlideMapping};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::context::{assemble_context, ContextBundle};
pub use crate::error::{PipelineError, Result};
pub use crate::extraction::{MediaExtractor, SlideDeck, TesseractExtractor, TextExtractor};
pub use crate::fetch::ArtifactFetcher;
pub use crate::generation::{GeneratedQuestion, QuestionGenerator};
pub use crate::grading::AnswerGrader;
pub use crate::ingest::{IngestRequest, LectureIngestor};
pub use crate::insights::{AggregationOutcome, InsightAggregator};
pub use crate::llm::{create_model, GenerativeModel, ModelConfig, ModelProvider};
pub use crate::report::{BatchReport, UnitOutcome};
pub use crate::store::memory::InMemoryStore;
pub use crate::store::records::Scope;
pub use crate::store::rest::RestStore;
pub use crate::store::RecordStore;
pub use crate::transcribe::WhisperTranscriber;
pub use crate::transcript::{Transcript, TranscriptSegment};
