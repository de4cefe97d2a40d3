//! Splitting homework documents into numbered questions and answers.
//!
//! Problem statements and student submissions arrive as one blob of PDF
//! text. The model splits the blob into numbered items; question items are
//! persisted as homework questions, answer items are paired against them
//! by number during submission grading.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::llm::{clean_model_response, ChatMessage, GenerativeModel};
use crate::store::records::{self, relations, QuestionRow};
use crate::store::RecordStore;

/// Which kind of document is being split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    ProblemStatement,
    Submission,
}

/// One numbered question or answer pulled out of a document
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NumberedItem {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct SplitResponse {
    questions: Vec<NumberedItem>,
}

fn split_prompt(kind: DocumentKind, text: &str) -> String {
    let (document, items) = match kind {
        DocumentKind::ProblemStatement => ("Parse this problem statement document", "questions"),
        DocumentKind::Submission => ("Parse this student answer document", "answers"),
    };
    format!(
        "{document} into separate questions.\n\n\
         Document text:\n\
         {text}\n\n\
         Split this into individual {items} and return them in the following JSON format:\n\
         {{\n\
             \"questions\": [\n\
                 {{\n\
                     \"number\": 1,\n\
                     \"text\": \"full question text here\"\n\
                 }},\n\
                 ...\n\
             ]\n\
         }}\n\n\
         Guidelines:\n\
         1. Preserve all formatting and content within each question\n\
         2. Include any subparts or additional context with each question\n\
         3. Maintain the original question numbering\n\
         4. Remove any headers, footers, or non-question content\n\
         5. Keep mathematical formulas, code snippets, and special characters intact"
    )
}

/// Split raw document text into numbered items, sorted by number.
///
/// The model response is parsed defensively; any shape violation is a
/// validation failure for the whole document.
pub async fn split_document(
    model: &dyn GenerativeModel,
    kind: DocumentKind,
    text: &str,
) -> Result<Vec<NumberedItem>> {
    let messages = vec![
        ChatMessage::system(
            "You are an expert at parsing academic documents and identifying distinct questions and answers.",
        ),
        ChatMessage::user(split_prompt(kind, text)),
    ];
    let response = model.generate(messages).await?;

    let cleaned = clean_model_response(&response.content);
    let parsed: SplitResponse = serde_json::from_str(&cleaned).map_err(|e| {
        PipelineError::Validation(format!("document split response is malformed: {e}"))
    })?;

    if parsed.questions.is_empty() {
        return Err(PipelineError::Validation(
            "document split produced no items".to_string(),
        ));
    }

    let mut items = parsed.questions;
    items.sort_by_key(|item| item.number);
    Ok(items)
}

/// Persist split problem-statement items as homework questions.
///
/// Counters start at zero; `max_points` defaults per question and can be
/// adjusted later through the store.
pub async fn store_homework_questions(
    store: &dyn RecordStore,
    homework_id: i64,
    items: &[NumberedItem],
) -> Result<Vec<QuestionRow>> {
    let mut stored = Vec::with_capacity(items.len());
    for item in items {
        let row = json!({
            "homework_id": homework_id,
            "question_number": item.number,
            "question_text": item.text,
            "total_submission": 0,
            "correct_submission": 0,
        });
        let inserted = store.insert(relations::HOMEWORK_QUESTIONS, row).await?;
        let question: QuestionRow = records::decode_row(relations::HOMEWORK_QUESTIONS, inserted)?;
        stored.push(question);
    }

    info!(
        "📚 Stored {} questions for homework {}",
        stored.len(),
        homework_id
    );
    Ok(stored)
}

/// Pair questions and answers by their shared item number. Items missing
/// a counterpart on either side are left out.
pub fn pair_by_number<'a>(
    questions: &'a [QuestionRow],
    answers: &'a [NumberedItem],
) -> Vec<(&'a QuestionRow, &'a NumberedItem)> {
    questions
        .iter()
        .filter_map(|question| {
            let number = question.question_number?;
            let answer = answers.iter().find(|answer| answer.number == number)?;
            Some((question, answer))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_support::ScriptedModel;
    use crate::store::memory::InMemoryStore;

    fn question_row(id: i64, number: u32) -> QuestionRow {
        QuestionRow {
            id,
            session_id: None,
            homework_id: Some(7),
            question_number: Some(number),
            question_text: format!("Question {number}"),
            answer: None,
            explanation: None,
            timestamp: None,
            max_points: None,
            total_submission: Some(0),
            correct_submission: Some(0),
        }
    }

    #[tokio::test]
    async fn test_split_document_sorts_by_number() {
        let model = ScriptedModel::new(&[r#"{"questions": [
            {"number": 2, "text": "Prove the union bound."},
            {"number": 1, "text": "Define a set."}
        ]}"#]);

        let items = split_document(&model, DocumentKind::ProblemStatement, "doc text")
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].number, 1);
        assert_eq!(items[1].number, 2);
        assert_eq!(items[0].text, "Define a set.");
    }

    #[tokio::test]
    async fn test_split_document_rejects_malformed_response() {
        let model = ScriptedModel::new(&[r#"{"items": []}"#]);
        let result = split_document(&model, DocumentKind::Submission, "doc text").await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_split_document_rejects_empty_list() {
        let model = ScriptedModel::new(&[r#"{"questions": []}"#]);
        let result = split_document(&model, DocumentKind::ProblemStatement, "doc text").await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_store_homework_questions_assigns_ids() {
        let store = InMemoryStore::new();
        let items = vec![
            NumberedItem {
                number: 1,
                text: "Define a set.".to_string(),
            },
            NumberedItem {
                number: 2,
                text: "Prove the union bound.".to_string(),
            },
        ];

        let stored = store_homework_questions(&store, 7, &items).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].id > 0);
        assert_eq!(stored[0].homework_id, Some(7));
        assert_eq!(stored[1].question_number, Some(2));
        assert_eq!(stored[0].total_submission, Some(0));
    }

    #[test]
    fn test_pair_by_number_skips_unmatched_items() {
        let questions = vec![question_row(1, 1), question_row(2, 2), question_row(3, 3)];
        let answers = vec![
            NumberedItem {
                number: 3,
                text: "Answer three".to_string(),
            },
            NumberedItem {
                number: 1,
                text: "Answer one".to_string(),
            },
        ];

        let pairs = pair_by_number(&questions, &answers);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0.id, 1);
        assert_eq!(pairs[0].1.text, "Answer one");
        assert_eq!(pairs[1].0.id, 3);
    }

    #[test]
    fn test_split_prompt_names_the_document_kind() {
        let problems = split_prompt(DocumentKind::ProblemStatement, "body");
        assert!(problems.starts_with("Parse this problem statement document"));
        assert!(problems.contains("individual questions"));

        let answers = split_prompt(DocumentKind::Submission, "body");
        assert!(answers.starts_with("Parse this student answer document"));
        assert!(answers.contains("individual answers"));
    }
}
