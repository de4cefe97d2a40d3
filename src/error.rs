//! Error taxonomy for the lecture pipeline

use std::path::PathBuf;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error types crossing the pipeline boundary.
///
/// Empty-but-valid outcomes (a frame with no legible text, a question with
/// no matching topics, a scope with no insights) are represented as empty
/// values by the components themselves and never reach this enum.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no transcript content at or before {timestamp}s")]
    InsufficientContext { timestamp: f64 },

    #[error("model output failed validation: {0}")]
    Validation(String),

    #[error("record store error: {0}")]
    Persistence(#[from] crate::store::StoreError),

    #[error("model error: {0}")]
    Model(#[from] crate::llm::ModelError),

    #[error("extraction failed for {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("unit of work exceeded its {0}s budget")]
    Timeout(u64),

    #[error("missing record: {relation} with {key}={value}")]
    MissingRecord {
        relation: String,
        key: String,
        value: String,
    },
}
