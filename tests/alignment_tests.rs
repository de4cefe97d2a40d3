//! End-to-end alignment flow: a slide deck and sampled frames go in, a
//! persisted mapping artifact comes out, and context assembly runs against
//! the reloaded artifact exactly as question generation would see it.

use lecture_companion::extraction::{FrameSample, Slide, SlideDeck};
use lecture_companion::llm::ContentPart;
use lecture_companion::{
    assemble_context, PipelineError, SlideAligner, SlideMapping, Transcript, TranscriptSegment,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SLIDE_TEXTS: [&str; 4] = [
    "intro to sets",
    "union and intersection",
    "venn diagrams",
    "practice problems",
];

/// Deck with one rendered image per slide so context assembly can read
/// real bytes back.
fn lecture_deck(dir: &Path) -> (SlideDeck, Vec<PathBuf>) {
    let mut images = Vec::new();
    let slides = SLIDE_TEXTS
        .iter()
        .enumerate()
        .map(|(index, text)| {
            let image_path = dir.join(format!("slide-{:02}.jpg", index + 1));
            std::fs::write(&image_path, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
            images.push(image_path.clone());
            Slide {
                index,
                image_path,
                text: text.to_string(),
            }
        })
        .collect();

    (
        SlideDeck {
            source_pdf: dir.join("slides.pdf"),
            slides,
        },
        images,
    )
}

fn sampled_frames() -> Vec<FrameSample> {
    vec![
        FrameSample {
            timestamp: 0.0,
            text: "intro to sets content".to_string(),
        },
        FrameSample {
            timestamp: 30.0,
            text: "union intersection operations".to_string(),
        },
        FrameSample {
            timestamp: 90.0,
            text: "venn diagrams example".to_string(),
        },
    ]
}

fn spoken_transcript() -> Transcript {
    Transcript::new(vec![
        TranscriptSegment {
            start: 10.0,
            end: 20.0,
            text: "We begin with the definition of a set.".to_string(),
        },
        TranscriptSegment {
            start: 40.0,
            end: 47.0,
            text: "Unions combine two sets into one.".to_string(),
        },
        TranscriptSegment {
            start: 50.0,
            end: 59.0,
            text: "Intersections keep only shared elements.".to_string(),
        },
    ])
}

#[tokio::test]
async fn test_align_and_persist_places_reached_slides_only() {
    let dir = TempDir::new().unwrap();
    let (deck, _images) = lecture_deck(dir.path());

    let mapping =
        SlideAligner::default().align(&deck, &sampled_frames(), &dir.path().join("lecture.mp4"));

    // Slides 1-3 are seen at 0s, 30s and 90s; slide 4 is never reached.
    assert_eq!(mapping.total_slides, 4);
    let placements: Vec<(usize, f64)> = mapping
        .slide_timestamps
        .iter()
        .map(|entry| (entry.index, entry.timestamp))
        .collect();
    assert_eq!(placements, vec![(0, 0.0), (1, 30.0), (2, 90.0)]);
    assert!(mapping.is_monotonic());

    let artifact = dir.path().join("slide_mapping.json");
    mapping.save(&artifact).await.unwrap();

    // The artifact speaks in 1-based slide numbers.
    let raw = std::fs::read_to_string(&artifact).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["total_slides"], 4);
    assert_eq!(value["slide_timestamps"][0]["slide"], 1);
    assert_eq!(value["matched_pairs"][2]["slide"], 3);

    let restored = SlideMapping::load(&artifact).await.unwrap();
    let restored_placements: Vec<(usize, f64)> = restored
        .slide_timestamps
        .iter()
        .map(|entry| (entry.index, entry.timestamp))
        .collect();
    assert_eq!(restored_placements, placements);
    assert!(restored.is_monotonic());
}

#[tokio::test]
async fn test_context_from_reloaded_artifact() {
    let dir = TempDir::new().unwrap();
    let (deck, images) = lecture_deck(dir.path());

    let mapping =
        SlideAligner::default().align(&deck, &sampled_frames(), &dir.path().join("lecture.mp4"));
    let artifact = dir.path().join("slide_mapping.json");
    mapping.save(&artifact).await.unwrap();
    let mapping = SlideMapping::load(&artifact).await.unwrap();

    // At 45s the lecture has shown slides 1-2 and spoken two segments.
    let bundle = assemble_context(45.0, &mapping, &spoken_transcript(), &images)
        .await
        .unwrap();

    assert_eq!(bundle.slides_included, 2);
    assert_eq!(bundle.segments_included, 2);
    assert_eq!(bundle.parts.len(), 5);

    match bundle.parts.last().unwrap() {
        ContentPart::Text(block) => {
            assert!(block.contains("Unions combine two sets into one."));
            assert!(!block.contains("Intersections"));
        }
        _ => panic!("expected the transcript block last"),
    }
}

#[tokio::test]
async fn test_context_before_first_speech_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (deck, images) = lecture_deck(dir.path());

    let mapping =
        SlideAligner::default().align(&deck, &sampled_frames(), &dir.path().join("lecture.mp4"));

    let err = assemble_context(5.0, &mapping, &spoken_transcript(), &images)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InsufficientContext { timestamp } if timestamp == 5.0
    ));
}

#[tokio::test]
async fn test_transcript_artifact_round_trip() {
    let dir = TempDir::new().unwrap();
    let transcript = spoken_transcript();

    let artifact = dir.path().join("transcript.json");
    transcript.save(&artifact).await.unwrap();
    let restored = Transcript::load(&artifact).await.unwrap();

    assert_eq!(restored.segments.len(), 3);
    assert_eq!(restored.segments[1].start, 40.0);
    assert_eq!(
        restored.text_until(45.0),
        "We begin with the definition of a set. Unions combine two sets into one."
    );
}
