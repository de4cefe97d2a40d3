//! Question generation pipeline.
//!
//! Assembles the timestamp-scoped context bundle, asks the model for an
//! exact number of structured questions, validates the whole batch before
//! anything is saved, then persists each question followed by its topic
//! mappings. Validation is all-or-nothing per generation call; topic
//! mapping inserts are best-effort per question.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::alignment::SlideMapping;
use crate::context::{assemble_context, ContextBundle};
use crate::error::{PipelineError, Result};
use crate::llm::{clean_model_response, ChatMessage, ContentPart, GenerativeModel};
use crate::store::records::{self, relations, QuestionRow};
use crate::store::RecordStore;
use crate::topics;
use crate::transcript::Transcript;

/// Knobs for question generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// How many questions to demand per generation call
    pub question_count: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { question_count: 3 }
    }
}

/// One structurally valid question as returned by the model. Only the
/// question text itself is required; answer and explanation are kept when
/// the model provides them.
#[derive(Debug, Clone, Deserialize)]
pub struct DraftQuestion {
    pub question: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// A persisted question annotated with its store id and resolved topics
#[derive(Debug, Clone)]
pub struct GeneratedQuestion {
    pub id: i64,
    pub session_id: i64,
    pub question_number: u32,
    pub question: String,
    pub answer: Option<String>,
    pub explanation: Option<String>,
    pub timestamp: f64,
    pub topic_ids: Vec<i64>,
}

pub struct QuestionGenerator {
    model: Arc<dyn GenerativeModel>,
    store: Arc<dyn RecordStore>,
    config: GenerationConfig,
}

impl QuestionGenerator {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        store: Arc<dyn RecordStore>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            model,
            store,
            config,
        }
    }

    /// Generate, categorize, and store questions for one session at one
    /// lecture timestamp.
    ///
    /// Fails fast with `InsufficientContext` when no transcript precedes
    /// the timestamp, and with `Validation` when the model response does
    /// not contain exactly the requested number of well-formed questions.
    /// In both cases nothing is persisted.
    pub async fn generate_for_session(
        &self,
        session_id: i64,
        class_id: i64,
        timestamp: f64,
        mapping: &SlideMapping,
        transcript: &Transcript,
        slide_images: &[PathBuf],
    ) -> Result<Vec<GeneratedQuestion>> {
        let context = assemble_context(timestamp, mapping, transcript, slide_images).await?;
        info!(
            "🔍 Generating {} questions at t={}s ({} slides, {} transcript segments in context)",
            self.config.question_count, timestamp, context.slides_included, context.segments_included
        );

        let drafts = self.request_drafts(context).await?;
        let topic_scope = topics::fetch_topics(self.store.as_ref(), class_id).await?;

        let mut stored = Vec::with_capacity(drafts.len());
        for (i, draft) in drafts.into_iter().enumerate() {
            let number = i as u32 + 1;
            let topic_ids = topics::categorize_question(
                self.model.as_ref(),
                &topic_scope,
                &draft.question,
                draft.explanation.as_deref().unwrap_or(""),
            )
            .await;

            let id = self
                .persist_question(session_id, number, timestamp, &draft, &topic_ids)
                .await?;
            debug!(
                "✅ Stored question {} (id {}, {} topics)",
                number,
                id,
                topic_ids.len()
            );

            stored.push(GeneratedQuestion {
                id,
                session_id,
                question_number: number,
                question: draft.question,
                answer: draft.answer,
                explanation: draft.explanation,
                timestamp,
                topic_ids,
            });
        }

        info!(
            "🎉 Stored {} questions for session {}",
            stored.len(),
            session_id
        );
        Ok(stored)
    }

    /// One model call producing the full validated draft batch
    async fn request_drafts(&self, context: ContextBundle) -> Result<Vec<DraftQuestion>> {
        let mut parts = Vec::with_capacity(context.parts.len() + 1);
        parts.push(ContentPart::Text(generation_prompt(
            self.config.question_count,
        )));
        parts.extend(context.parts);

        let response = self.model.generate(vec![ChatMessage::user_parts(parts)]).await?;
        parse_questions(&response.content, self.config.question_count as usize)
    }

    /// Insert the question row, then its topic mappings. A failed question
    /// insert aborts the mappings; a failed mapping is logged and skipped.
    async fn persist_question(
        &self,
        session_id: i64,
        number: u32,
        timestamp: f64,
        draft: &DraftQuestion,
        topic_ids: &[i64],
    ) -> Result<i64> {
        let row = json!({
            "session_id": session_id,
            "question_number": number,
            "question_text": draft.question,
            "answer": draft.answer,
            "explanation": draft.explanation,
            "timestamp": timestamp,
            "total_submission": 0,
            "correct_submission": 0,
        });
        let inserted = self.store.insert(relations::SESSION_QUESTIONS, row).await?;
        let stored: QuestionRow = records::decode_row(relations::SESSION_QUESTIONS, inserted)?;

        for &topic_id in topic_ids {
            let mapping = json!({ "question_id": stored.id, "topic_id": topic_id });
            if let Err(e) = self.store.insert(relations::QUESTION_TOPICS, mapping).await {
                warn!(
                    "topic mapping insert failed for question {} -> topic {}: {}",
                    stored.id, topic_id, e
                );
            }
        }

        Ok(stored.id)
    }
}

fn generation_prompt(count: u32) -> String {
    format!(
        "You are an expert teaching assistant helping to generate questions to test student understanding.\n\
         Based on the lecture slides (shown as images) and transcript provided, generate {count} questions \
         that test student comprehension of the key concepts covered so far. Each question should:\n\
         1. Test understanding, not just recall\n\
         2. Be clear and unambiguous\n\
         3. Focus on important concepts, not minor details\n\
         4. Include the correct answer and a brief explanation\n\n\
         Format each question as a JSON object with these fields:\n\
         - question: The actual question text\n\
         - answer: The correct answer\n\
         - explanation: Brief explanation of why this is correct\n\n\
         Return exactly {count} questions in a JSON array. Return ONLY the JSON array, no other text or formatting."
    )
}

/// Parse and validate the raw model response into exactly `expected`
/// drafts. Any shape violation rejects the whole batch.
fn parse_questions(raw: &str, expected: usize) -> Result<Vec<DraftQuestion>> {
    let cleaned = clean_model_response(raw);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| PipelineError::Validation(format!("model response is not valid JSON: {e}")))?;

    let items = value
        .as_array()
        .ok_or_else(|| PipelineError::Validation("model response is not a JSON array".to_string()))?;

    if items.len() != expected {
        return Err(PipelineError::Validation(format!(
            "expected exactly {expected} questions, got {}",
            items.len()
        )));
    }

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(item.clone()).map_err(|e| {
                PipelineError::Validation(format!("question {} is malformed: {e}", i + 1))
            })
        })
        .collect()
}
