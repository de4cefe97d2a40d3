use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lecture_companion::alignment::jaccard_similarity;
use lecture_companion::extraction::{FrameSample, Slide, SlideDeck};
use lecture_companion::{Config, SlideAligner};
use std::path::{Path, PathBuf};

fn slide_text(index: usize) -> String {
    format!("section {index} concept alpha{index} beta{index} gamma{index} shared lecture terms")
}

fn synthetic_deck(slides: usize) -> SlideDeck {
    SlideDeck {
        source_pdf: PathBuf::from("bench.pdf"),
        slides: (0..slides)
            .map(|index| Slide {
                index,
                image_path: PathBuf::from(format!("slide-{:03}.jpg", index + 1)),
                text: slide_text(index),
            })
            .collect(),
    }
}

/// One noisy frame sample per 30s interval, several per slide, the way a
/// real lecture dwells on each slide before advancing.
fn synthetic_frames(slides: usize, frames_per_slide: usize) -> Vec<FrameSample> {
    let mut frames = Vec::with_capacity(slides * frames_per_slide);
    for slide in 0..slides {
        for frame in 0..frames_per_slide {
            frames.push(FrameSample {
                timestamp: (slide * frames_per_slide + frame) as f64 * 30.0,
                text: format!(
                    "section {slide} concept alpha{slide} beta{slide} gamma{slide} ocr noise"
                ),
            });
        }
    }
    frames
}

/// Benchmark the fuzzy text similarity kernel
fn bench_jaccard(c: &mut Criterion) {
    let slide = slide_text(7);
    let frame = "section 7 concept alpha7 beta7 gamma7 ocr noise";

    c.bench_function("jaccard_similarity", |b| {
        b.iter(|| jaccard_similarity(black_box(&slide), black_box(frame)))
    });
}

/// Benchmark full deck alignment at typical lecture sizes
fn bench_alignment(c: &mut Criterion) {
    for slides in [10usize, 50] {
        let deck = synthetic_deck(slides);
        let frames = synthetic_frames(slides, 4);
        let aligner = SlideAligner::default();

        c.bench_function(&format!("align_{}_slides", slides), |b| {
            b.iter(|| {
                aligner.align(
                    black_box(&deck),
                    black_box(&frames),
                    Path::new("lecture.mp4"),
                )
            })
        });
    }
}

/// Benchmark mapping lookups used during context assembly
fn bench_mapping_queries(c: &mut Criterion) {
    let deck = synthetic_deck(50);
    let frames = synthetic_frames(50, 4);
    let mapping = SlideAligner::default().align(&deck, &frames, Path::new("lecture.mp4"));

    c.bench_function("latest_index_at", |b| {
        b.iter(|| mapping.latest_index_at(black_box(3_000.0)))
    });

    c.bench_function("mapping_is_monotonic", |b| b.iter(|| mapping.is_monotonic()));
}

/// Benchmark configuration loading and validation
fn bench_config_operations(c: &mut Criterion) {
    c.bench_function("config_default", |b| b.iter(|| black_box(Config::default())));

    c.bench_function("config_summary", |b| {
        let config = Config::default();
        b.iter(|| config.summary())
    });
}

criterion_group!(
    benches,
    bench_jaccard,
    bench_alignment,
    bench_mapping_queries,
    bench_config_operations
);

criterion_main!(benches);
