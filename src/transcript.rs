//! Lecture transcript types and the timestamp prefix filter

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// One transcribed span of speech
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSegment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Transcribed text
    pub text: String,
}

/// Full transcript of one lecture, segments ordered by start time
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    pub fn new(segments: Vec<TranscriptSegment>) -> Self {
        Self { segments }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// All segments that started at or before `timestamp`, in original order.
    pub fn segments_until(&self, timestamp: f64) -> Vec<&TranscriptSegment> {
        self.segments
            .iter()
            .filter(|segment| segment.start <= timestamp)
            .collect()
    }

    /// The spoken text up to `timestamp`, segment texts joined with spaces.
    pub fn text_until(&self, timestamp: f64) -> String {
        self.segments_until(timestamp)
            .iter()
            .map(|segment| segment.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Save the transcript as JSON.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).await?;
        Ok(())
    }

    /// Load a transcript from JSON.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Transcript {
        Transcript::new(vec![
            TranscriptSegment {
                start: 10.0,
                end: 25.0,
                text: "Today we introduce sets.".to_string(),
            },
            TranscriptSegment {
                start: 40.0,
                end: 48.0,
                text: "A union combines elements.".to_string(),
            },
            TranscriptSegment {
                start: 50.0,
                end: 62.0,
                text: "Venn diagrams visualize overlap.".to_string(),
            },
        ])
    }

    #[test]
    fn test_segments_until_excludes_later_starts() {
        let transcript = fixture();
        let prefix = transcript.segments_until(45.0);
        assert_eq!(prefix.len(), 2);
        assert_eq!(prefix[1].start, 40.0);
    }

    #[test]
    fn test_segments_until_includes_boundary() {
        let transcript = fixture();
        assert_eq!(transcript.segments_until(50.0).len(), 3);
    }

    #[test]
    fn test_text_until_joins_in_order() {
        let transcript = fixture();
        assert_eq!(
            transcript.text_until(45.0),
            "Today we introduce sets. A union combines elements."
        );
    }

    #[test]
    fn test_text_until_before_first_segment_is_empty() {
        let transcript = fixture();
        assert!(transcript.text_until(5.0).is_empty());
    }
}
