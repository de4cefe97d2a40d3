//! Slide-to-video temporal alignment.
//!
//! Matches slides to sampled video frames by fuzzy text similarity under a
//! monotonic-ordering constraint: lectures advance slides roughly in order,
//! with only small local reordering. A windowed greedy pass over the frames
//! is O(frames x window) and tolerates OCR noise without ever backtracking.

use crate::error::{PipelineError, Result};
use crate::extraction::{FrameSample, SlideDeck};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Tuning knobs for the aligner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignerConfig {
    /// Minimum Jaccard score for a frame to claim a slide
    pub min_match_score: f64,
    /// How many upcoming slides compete for each frame
    pub window: usize,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            min_match_score: 0.30,
            window: 5,
        }
    }
}

/// Jaccard similarity over whitespace-tokenized, lower-cased word sets.
/// Zero when either side has no words.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();

    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();

    intersection as f64 / union as f64
}

/// First-seen timestamp for one slide (0-based index)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideTimestamp {
    pub index: usize,
    pub timestamp: f64,
}

/// One accepted frame-to-slide match with its similarity score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchedPair {
    pub timestamp: f64,
    pub index: usize,
    pub score: f64,
}

/// Derived slide-to-timestamp mapping for one lecture.
///
/// `slide_timestamps` covers every placed slide, including backfilled ones;
/// `matched_pairs` records only the frames that actually won a match.
/// Regenerated wholesale when a lecture is re-ingested, never patched.
#[derive(Debug, Clone)]
pub struct SlideMapping {
    pub video_path: PathBuf,
    pub pdf_path: PathBuf,
    pub total_slides: usize,
    pub slide_timestamps: Vec<SlideTimestamp>,
    pub matched_pairs: Vec<MatchedPair>,
    pub generated_at: DateTime<Utc>,
}

impl SlideMapping {
    /// Latest matched slide index at or before `timestamp`
    pub fn latest_index_at(&self, timestamp: f64) -> Option<usize> {
        self.slide_timestamps
            .iter()
            .filter(|entry| entry.timestamp <= timestamp)
            .map(|entry| entry.index)
            .max()
    }

    /// Matched indices are strictly increasing and their timestamps never
    /// go backwards
    pub fn is_monotonic(&self) -> bool {
        self.slide_timestamps.windows(2).all(|pair| {
            pair[1].index > pair[0].index && pair[1].timestamp >= pair[0].timestamp
        })
    }

    /// Convert to the persisted artifact form (1-based slide numbers)
    pub fn to_file(&self) -> SlideMappingFile {
        SlideMappingFile {
            video_path: self.video_path.to_string_lossy().into_owned(),
            pdf_path: self.pdf_path.to_string_lossy().into_owned(),
            total_slides: self.total_slides,
            slide_timestamps: self
                .slide_timestamps
                .iter()
                .map(|entry| SlideTimestampEntry {
                    slide: entry.index + 1,
                    timestamp: entry.timestamp,
                })
                .collect(),
            matched_pairs: self
                .matched_pairs
                .iter()
                .map(|pair| MatchedPairEntry {
                    timestamp: pair.timestamp,
                    slide: pair.index + 1,
                    match_score: pair.score,
                })
                .collect(),
            timestamp: self.generated_at,
        }
    }

    /// Convert back from the persisted artifact form. Rejects slide number
    /// 0, which cannot exist in the 1-based wire format.
    pub fn from_file(file: SlideMappingFile) -> Result<Self> {
        let slide_timestamps = file
            .slide_timestamps
            .into_iter()
            .map(|entry| {
                if entry.slide == 0 {
                    return Err(PipelineError::Validation(
                        "slide numbers in mapping artifacts are 1-based; found 0".to_string(),
                    ));
                }
                Ok(SlideTimestamp {
                    index: entry.slide - 1,
                    timestamp: entry.timestamp,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let matched_pairs = file
            .matched_pairs
            .into_iter()
            .map(|pair| {
                if pair.slide == 0 {
                    return Err(PipelineError::Validation(
                        "slide numbers in mapping artifacts are 1-based; found 0".to_string(),
                    ));
                }
                Ok(MatchedPair {
                    timestamp: pair.timestamp,
                    index: pair.slide - 1,
                    score: pair.match_score,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            video_path: PathBuf::from(file.video_path),
            pdf_path: PathBuf::from(file.pdf_path),
            total_slides: file.total_slides,
            slide_timestamps,
            matched_pairs,
            generated_at: file.timestamp,
        })
    }

    /// Persisted artifact form as a JSON value, for attaching to a lecture
    /// row
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.to_file())?)
    }

    /// Save the mapping artifact as JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_file())?;
        fs::write(path, json).await?;
        info!("💾 Saved slide mapping to {}", path.display());
        Ok(())
    }

    /// Load a mapping artifact from JSON
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let file: SlideMappingFile = serde_json::from_str(&content)?;
        Self::from_file(file)
    }

    /// Decode a mapping previously attached to a lecture row
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let file: SlideMappingFile = serde_json::from_value(value)?;
        Self::from_file(file)
    }
}

/// Persisted slide-mapping artifact. Slide numbers are 1-based on the wire;
/// all in-memory indices are 0-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideMappingFile {
    pub video_path: String,
    pub pdf_path: String,
    pub total_slides: usize,
    pub slide_timestamps: Vec<SlideTimestampEntry>,
    pub matched_pairs: Vec<MatchedPairEntry>,
    /// Generation time
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideTimestampEntry {
    pub slide: usize,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedPairEntry {
    pub timestamp: f64,
    pub slide: usize,
    pub match_score: f64,
}

/// Greedy monotonic aligner
#[derive(Debug, Clone, Default)]
pub struct SlideAligner {
    config: AlignerConfig,
}

impl SlideAligner {
    pub fn new(config: AlignerConfig) -> Self {
        Self { config }
    }

    /// Align a slide deck against sampled frames.
    ///
    /// Frames must be sorted ascending by timestamp and pre-filtered to
    /// non-empty text. Slides never reached stay out of the result, which
    /// is expected for trailing material the lecture didn't cover.
    pub fn align(&self, deck: &SlideDeck, frames: &[FrameSample], video_path: &Path) -> SlideMapping {
        let total_slides = deck.len();
        let mut available: BTreeSet<usize> = (0..total_slides).collect();
        let mut last_matched: Option<usize> = None;
        let mut slide_timestamps = Vec::new();
        let mut matched_pairs = Vec::new();

        info!(
            "🔍 Matching {} frames against {} slides",
            frames.len(),
            total_slides
        );

        for frame in frames {
            // Candidate window: the next slides after the last match that
            // are still unplaced
            let window: Vec<usize> = available
                .iter()
                .copied()
                .filter(|&index| last_matched.map_or(true, |last| index > last))
                .take(self.config.window)
                .collect();

            if window.is_empty() {
                debug!("all reachable slides placed at {:.1}s", frame.timestamp);
                break;
            }

            let mut best_index = window[0];
            let mut best_score = 0.0;
            for &index in &window {
                let score = jaccard_similarity(&deck.slides[index].text, &frame.text);
                debug!(
                    "t={:.1}s slide {} scored {:.3}",
                    frame.timestamp,
                    index + 1,
                    score
                );
                if score > best_score {
                    best_score = score;
                    best_index = index;
                }
            }

            if best_score < self.config.min_match_score {
                continue;
            }

            // Slides skipped on the way to the best match were shown only
            // momentarily; stamp them at this frame and take them out of
            // play.
            let skipped: Vec<usize> = available
                .iter()
                .copied()
                .filter(|&index| {
                    index < best_index && last_matched.map_or(true, |last| index > last)
                })
                .collect();
            for index in skipped {
                slide_timestamps.push(SlideTimestamp {
                    index,
                    timestamp: frame.timestamp,
                });
                available.remove(&index);
            }

            slide_timestamps.push(SlideTimestamp {
                index: best_index,
                timestamp: frame.timestamp,
            });
            available.remove(&best_index);
            matched_pairs.push(MatchedPair {
                timestamp: frame.timestamp,
                index: best_index,
                score: best_score,
            });

            info!(
                "✅ Slide {} found at {:.1}s (score {:.3})",
                best_index + 1,
                frame.timestamp,
                best_score
            );

            last_matched = Some(best_index);
        }

        info!(
            "📊 Placed {}/{} slides",
            slide_timestamps.len(),
            total_slides
        );

        SlideMapping {
            video_path: video_path.to_path_buf(),
            pdf_path: deck.source_pdf.clone(),
            total_slides,
            slide_timestamps,
            matched_pairs,
            generated_at: Utc::now(),
        }
    }
}
