pub mod memory;
pub mod records;
pub mod rest;

use async_trait::async_trait;
use serde_json::Value;

/// Result type for record-store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error types for record-store operations
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store API error {status} on {relation}: {body}")]
    Api {
        relation: String,
        status: u16,
        body: String,
    },

    #[error("row decode failed for {relation}: {reason}")]
    Decode { relation: String, reason: String },

    #[error("no row returned from insert into {0}")]
    EmptyInsert(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Equality filter over one column of a relation
#[derive(Debug, Clone)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Key-value-ish persistence collaborator: create/read/update/delete over
/// named relations with simple equality filters. No joins; callers stitch
/// rows together in application code.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert one row, returning the stored representation (including any
    /// server-assigned id).
    async fn insert(&self, relation: &str, row: Value) -> Result<Value>;

    /// Select all rows matching every filter.
    async fn select(&self, relation: &str, filters: &[Filter]) -> Result<Vec<Value>>;

    /// Apply a patch to all rows matching every filter, returning the
    /// updated rows.
    async fn update(&self, relation: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>>;

    /// Delete all rows matching every filter.
    async fn delete(&self, relation: &str, filters: &[Filter]) -> Result<()>;
}
