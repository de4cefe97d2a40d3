//! Timestamp-scoped context assembly.
//!
//! Builds the "as-of" view of a lecture for a target timestamp: every slide
//! shown so far (cumulative, so students keep prior visual context) followed
//! by the transcript prefix. Question generation feeds this bundle straight
//! into the model.

use crate::alignment::SlideMapping;
use crate::error::{PipelineError, Result};
use crate::llm::ContentPart;
use crate::transcript::Transcript;
use std::path::PathBuf;
use tracing::debug;

/// Assembled model context for one timestamp
#[derive(Debug)]
pub struct ContextBundle {
    /// Slide images interleaved with their "Slide N" tags, then the
    /// transcript block
    pub parts: Vec<ContentPart>,
    /// How many slides made the cut
    pub slides_included: usize,
    /// How many transcript segments made the cut
    pub segments_included: usize,
}

/// Assemble the context bundle for `timestamp`.
///
/// `slide_images[i]` is the rendered image of slide index `i`. The slide
/// portion may legitimately be empty (nothing matched yet); an empty
/// transcript prefix is an `InsufficientContext` error because no questions
/// can be grounded in a lecture that has not said anything yet.
pub async fn assemble_context(
    timestamp: f64,
    mapping: &SlideMapping,
    transcript: &Transcript,
    slide_images: &[PathBuf],
) -> Result<ContextBundle> {
    let segments = transcript.segments_until(timestamp);
    if segments.is_empty() {
        return Err(PipelineError::InsufficientContext { timestamp });
    }

    let mut parts = Vec::new();

    // All slides from the first up to the latest one shown by `timestamp`
    let slides_included = match mapping.latest_index_at(timestamp) {
        Some(latest) => {
            for index in 0..=latest {
                let image_path = slide_images.get(index).ok_or_else(|| {
                    PipelineError::Validation(format!(
                        "slide mapping references slide {} but only {} images exist",
                        index + 1,
                        slide_images.len()
                    ))
                })?;
                let bytes = tokio::fs::read(image_path).await?;
                parts.push(ContentPart::ImageJpeg(bytes));
                parts.push(ContentPart::Text(format!("Slide {}", index + 1)));
            }
            latest + 1
        }
        None => 0,
    };

    let spoken = segments
        .iter()
        .map(|segment| segment.text.trim())
        .collect::<Vec<_>>()
        .join(" ");
    parts.push(ContentPart::Text(format!(
        "Lecture Transcript up to timestamp {}s:\n{}",
        timestamp, spoken
    )));

    debug!(
        "context at {}s: {} slides, {} transcript segments",
        timestamp,
        slides_included,
        segments.len()
    );

    Ok(ContextBundle {
        parts,
        slides_included,
        segments_included: segments.len(),
    })
}
