//! Full question lifecycle over the in-memory store: generation at a
//! lecture timestamp, grading of collected answers, misconception
//! aggregation. The model is scripted; everything else is real.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use lecture_companion::extraction::{FrameSample, Slide, SlideDeck};
use lecture_companion::generation::GenerationConfig;
use lecture_companion::grading::GradingConfig;
use lecture_companion::insights::AggregationConfig;
use lecture_companion::llm::{ChatMessage, ModelError, ModelResponse};
use lecture_companion::store::records::relations;
use lecture_companion::store::{Filter, RecordStore};
use lecture_companion::{
    AnswerGrader, GenerativeModel, InMemoryStore, InsightAggregator, ModelProvider, PipelineError,
    QuestionGenerator, Scope, SlideAligner, SlideMapping, Transcript, TranscriptSegment,
};

/// Model double replaying canned responses in call order
struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedModel {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
        })
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn generate(
        &self,
        _messages: Vec<ChatMessage>,
    ) -> lecture_companion::llm::Result<ModelResponse> {
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ModelError::EmptyResponse("scripted"))?;
        Ok(ModelResponse {
            content,
            tokens_used: None,
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn provider_type(&self) -> ModelProvider {
        ModelProvider::Gemini
    }
}

/// Aligned two-slide lecture plus the rendered images generation reads
fn aligned_lecture(dir: &Path) -> (SlideMapping, Vec<PathBuf>) {
    let mut images = Vec::new();
    let slides = ["intro to sets", "union and intersection"]
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
    let deck = SlideDeck {
        source_pdf: dir.join("slides.pdf"),
        slides,
    };

    let frames = vec![
        FrameSample {
            timestamp: 0.0,
            text: "intro to sets content".to_string(),
        },
        FrameSample {
            timestamp: 30.0,
            text: "union intersection operations".to_string(),
        },
    ];

    let mapping = SlideAligner::default().align(&deck, &frames, &dir.join("lecture.mp4"));
    (mapping, images)
}

fn spoken_transcript() -> Transcript {
    Transcript::new(vec![
        TranscriptSegment {
            start: 10.0,
            end: 25.0,
            text: "A set is a collection of distinct objects.".to_string(),
        },
        TranscriptSegment {
            start: 40.0,
            end: 55.0,
            text: "The union of two sets contains every element of both.".to_string(),
        },
    ])
}

const DRAFTS_JSON: &str = r#"[
    {"question": "What makes two sets equal?",
     "answer": "They contain exactly the same elements.",
     "explanation": "Set equality ignores order and repetition."},
    {"question": "What is the union of {1,2} and {2,3}?",
     "answer": "{1,2,3}",
     "explanation": "A union keeps every element from both sets."}
]"#;

const CLUSTER_JSON: &str =
    r#"{"misconceptions": [{"error_type": "Mixes up set relations", "error_count": 1}]}"#;

#[tokio::test]
async fn test_quiz_lifecycle_generates_grades_and_aggregates() {
    let dir = TempDir::new().unwrap();
    let (mapping, images) = aligned_lecture(dir.path());
    let store = Arc::new(InMemoryStore::new());

    store
        .seed(relations::SESSIONS, vec![json!({ "id": 1, "class_id": 1 })])
        .await;
    let topic = store
        .insert(
            relations::TOPICS,
            json!({ "title": "Set Operations", "class_id": 1 }),
        )
        .await
        .unwrap();
    let topic_id = topic["id"].as_i64().unwrap();

    // Generation: one draft batch, then one categorization per question.
    let generator = QuestionGenerator::new(
        ScriptedModel::new(&[DRAFTS_JSON, r#"["Set Operations"]"#, r#"["Set Operations"]"#]),
        store.clone(),
        GenerationConfig { question_count: 2 },
    );
    let questions = generator
        .generate_for_session(1, 1, 45.0, &mapping, &spoken_transcript(), &images)
        .await
        .unwrap();

    assert_eq!(questions.len(), 2);
    assert_eq!(questions[0].question_number, 1);
    assert_eq!(questions[0].topic_ids, vec![topic_id]);
    assert_eq!(questions[1].question, "What is the union of {1,2} and {2,3}?");

    // Students answer: two on the first question, one on the second.
    for (question_id, text) in [
        (questions[0].id, "Same elements either way."),
        (questions[0].id, "They must be written in the same order."),
        (questions[1].id, "{2}, the shared element."),
    ] {
        store
            .insert(
                relations::SESSION_RESPONSES,
                json!({ "question_id": question_id, "response_text": text }),
            )
            .await
            .unwrap();
    }

    // One worker grades questions in number order, answers in insertion
    // order: correct, wrong with insight, wrong with insight.
    let grader = AnswerGrader::new(
        ScriptedModel::new(&[
            "1",
            "0",
            "Thinks element order matters for set equality.",
            "0",
            "Confused union with intersection.",
        ]),
        store.clone(),
        GradingConfig {
            max_concurrent_questions: 1,
            unit_timeout_seconds: 300,
        },
    );
    let report = grader.grade_session(1).await.unwrap();
    assert_eq!(report.completed(), 3);
    assert!(report.is_clean());

    let rows = store
        .select(
            relations::SESSION_QUESTIONS,
            &[Filter::eq("id", questions[0].id)],
        )
        .await
        .unwrap();
    assert_eq!(rows[0]["total_submission"].as_i64(), Some(2));
    assert_eq!(rows[0]["correct_submission"].as_i64(), Some(1));

    let rows = store
        .select(
            relations::SESSION_QUESTIONS,
            &[Filter::eq("id", questions[1].id)],
        )
        .await
        .unwrap();
    assert_eq!(rows[0]["total_submission"].as_i64(), Some(1));
    assert_eq!(rows[0]["correct_submission"].as_i64(), Some(0));

    // Aggregation: one cluster call per question, then the narrative.
    let aggregator = InsightAggregator::new(
        ScriptedModel::new(&[
            CLUSTER_JSON,
            CLUSTER_JSON,
            "Students conflate set equality with union behavior.",
        ]),
        store.clone(),
        AggregationConfig {
            max_concurrent_questions: 1,
            unit_timeout_seconds: 300,
        },
    );
    let outcome = aggregator.aggregate(Scope::Session, 1).await.unwrap();
    assert_eq!(outcome.report.completed(), 2);
    assert_eq!(
        outcome.narrative.as_deref(),
        Some("Students conflate set equality with union behavior.")
    );

    let clusters = store
        .select(relations::SESSION_EXTRACTED_INSIGHTS, &[])
        .await
        .unwrap();
    assert_eq!(clusters.len(), 2);

    let narratives = store
        .select(relations::SESSION_NARRATIVES, &[])
        .await
        .unwrap();
    assert_eq!(narratives.len(), 1);
    assert_eq!(narratives[0]["session_id"].as_i64(), Some(1));
}

#[tokio::test]
async fn test_short_generation_batch_persists_nothing() {
    let dir = TempDir::new().unwrap();
    let (mapping, images) = aligned_lecture(dir.path());
    let store = Arc::new(InMemoryStore::new());

    // Two drafts against a demanded count of three.
    let generator = QuestionGenerator::new(
        ScriptedModel::new(&[DRAFTS_JSON]),
        store.clone(),
        GenerationConfig { question_count: 3 },
    );
    let result = generator
        .generate_for_session(1, 1, 45.0, &mapping, &spoken_transcript(), &images)
        .await;

    assert!(matches!(result, Err(PipelineError::Validation(_))));
    let questions = store
        .select(relations::SESSION_QUESTIONS, &[])
        .await
        .unwrap();
    assert!(questions.is_empty());
    let mappings = store.select(relations::QUESTION_TOPICS, &[]).await.unwrap();
    assert!(mappings.is_empty());
}

#[tokio::test]
async fn test_homework_submission_flow() {
    let store = Arc::new(InMemoryStore::new());

    let mut question_ids = Vec::new();
    for (number, text) in [
        (1u32, "Define a set in your own words."),
        (2u32, "Describe the union of two sets."),
    ] {
        let row = store
            .insert(
                relations::HOMEWORK_QUESTIONS,
                json!({
                    "homework_id": 7,
                    "question_number": number,
                    "question_text": text,
                    "total_submission": 0,
                    "correct_submission": 0,
                }),
            )
            .await
            .unwrap();
        question_ids.push(row["id"].as_i64().unwrap());
    }

    // Split the submission, then grade in question order: correct, wrong
    // with insight.
    let split = r#"{"questions": [
        {"number": 1, "text": "A set has no duplicate elements."},
        {"number": 2, "text": "The union is the smaller of the two sets."}
    ]}"#;
    let grader = AnswerGrader::new(
        ScriptedModel::new(&[split, "1", "0", "Believes a union shrinks the sets."]),
        store.clone(),
        GradingConfig {
            max_concurrent_questions: 1,
            unit_timeout_seconds: 300,
        },
    );
    let report = grader
        .grade_submission(7, "1. A set has no duplicates. 2. The smaller set.", Some("student-7"))
        .await
        .unwrap();
    assert_eq!(report.completed(), 2);
    assert_eq!(report.failed(), 0);

    let responses = store
        .select(relations::HOMEWORK_RESPONSES, &[])
        .await
        .unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["student_id"].as_str(), Some("student-7"));

    // Aggregating twice must not duplicate clusters or narratives; the
    // unanswered-insight question is skipped, not failed.
    for _ in 0..2 {
        let aggregator = InsightAggregator::new(
            ScriptedModel::new(&[CLUSTER_JSON, "Unions are widely misunderstood."]),
            store.clone(),
            AggregationConfig {
                max_concurrent_questions: 1,
                unit_timeout_seconds: 300,
            },
        );
        let outcome = aggregator.aggregate(Scope::Homework, 7).await.unwrap();
        assert_eq!(outcome.report.completed(), 1);
        assert_eq!(outcome.report.skipped(), 1);
        assert_eq!(
            outcome.narrative.as_deref(),
            Some("Unions are widely misunderstood.")
        );
    }

    let clusters = store
        .select(
            relations::HOMEWORK_EXTRACTED_INSIGHTS,
            &[Filter::eq("question_id", question_ids[1])],
        )
        .await
        .unwrap();
    assert_eq!(clusters.len(), 1);

    let narratives = store
        .select(relations::HOMEWORK_NARRATIVES, &[])
        .await
        .unwrap();
    assert_eq!(narratives.len(), 1);
    assert_eq!(narratives[0]["homework_id"].as_i64(), Some(7));
}
