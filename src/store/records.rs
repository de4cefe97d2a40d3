//! Typed row structs per relation, decoded at the store boundary.
//!
//! Store calls return loosely-typed JSON rows; everything past the I/O edge
//! works with these structs instead. Unknown columns are ignored, missing
//! optional columns decode to `None`.

use super::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Relation names understood by the record store.
pub mod relations {
    pub const LECTURES: &str = "lectures";
    pub const SESSIONS: &str = "sessions";
    pub const SESSION_QUESTIONS: &str = "session_questions";
    pub const SESSION_RESPONSES: &str = "session_responses";
    pub const TOPICS: &str = "topic";
    pub const QUESTION_TOPICS: &str = "question_topic";
    pub const SESSION_ANSWER_INSIGHTS: &str = "session_answer_insight";
    pub const SESSION_EXTRACTED_INSIGHTS: &str = "session_question_extracted_insight";
    pub const SESSION_NARRATIVES: &str = "session_insight";
    pub const HOMEWORKS: &str = "homework";
    pub const HOMEWORK_QUESTIONS: &str = "homework_question";
    pub const HOMEWORK_RESPONSES: &str = "homework_responses";
    pub const HOMEWORK_ANSWER_INSIGHTS: &str = "homework_answer_insight";
    pub const HOMEWORK_EXTRACTED_INSIGHTS: &str = "homework_question_extracted_insight";
    pub const HOMEWORK_NARRATIVES: &str = "homework_insight";
}

/// The two scopes questions are grouped and graded under: a live in-class
/// quiz session, or a take-home homework assignment. Each has its own set
/// of relations with the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Session,
    Homework,
}

impl Scope {
    pub fn questions_relation(self) -> &'static str {
        match self {
            Self::Session => relations::SESSION_QUESTIONS,
            Self::Homework => relations::HOMEWORK_QUESTIONS,
        }
    }

    pub fn responses_relation(self) -> &'static str {
        match self {
            Self::Session => relations::SESSION_RESPONSES,
            Self::Homework => relations::HOMEWORK_RESPONSES,
        }
    }

    pub fn answer_insights_relation(self) -> &'static str {
        match self {
            Self::Session => relations::SESSION_ANSWER_INSIGHTS,
            Self::Homework => relations::HOMEWORK_ANSWER_INSIGHTS,
        }
    }

    pub fn extracted_insights_relation(self) -> &'static str {
        match self {
            Self::Session => relations::SESSION_EXTRACTED_INSIGHTS,
            Self::Homework => relations::HOMEWORK_EXTRACTED_INSIGHTS,
        }
    }

    pub fn narrative_relation(self) -> &'static str {
        match self {
            Self::Session => relations::SESSION_NARRATIVES,
            Self::Homework => relations::HOMEWORK_NARRATIVES,
        }
    }

    /// Column naming the owning session or homework on the questions and
    /// narrative relations
    pub fn owner_column(self) -> &'static str {
        match self {
            Self::Session => "session_id",
            Self::Homework => "homework_id",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Homework => write!(f, "homework"),
        }
    }
}

/// A recorded lecture and its attached artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LectureRow {
    pub id: i64,
    pub class_id: Option<i64>,
    pub name: Option<String>,
    pub video_url: Option<String>,
    pub slides_url: Option<String>,
    /// Slide mapping artifact, stored as its persisted JSON form
    pub slide_mapping: Option<Value>,
    /// Transcript segments, stored as JSON
    pub transcript: Option<Value>,
    /// Questions to generate per request for this lecture
    pub num_questions: Option<u32>,
}

/// A live quiz session bound to one lecture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: i64,
    pub lecture_id: i64,
    pub class_id: Option<i64>,
}

/// One topic of a course's flat taxonomy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRow {
    pub id: i64,
    pub title: String,
    pub class_id: Option<i64>,
}

/// A generated question with its submission counters.
///
/// The same shape backs `session_questions` and `homework_question`; only
/// the owning scope column differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRow {
    pub id: i64,
    pub session_id: Option<i64>,
    pub homework_id: Option<i64>,
    pub question_number: Option<u32>,
    pub question_text: String,
    pub answer: Option<String>,
    pub explanation: Option<String>,
    /// Lecture timestamp the question was generated at, in seconds
    pub timestamp: Option<f64>,
    pub max_points: Option<i64>,
    pub total_submission: Option<i64>,
    pub correct_submission: Option<i64>,
}

impl QuestionRow {
    pub fn max_points(&self) -> i64 {
        self.max_points.unwrap_or(1)
    }
}

/// A stored student answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRow {
    pub id: i64,
    pub question_id: i64,
    pub student_id: Option<String>,
    pub response_text: String,
}

/// One misconception insight extracted from a single incorrect answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerInsightRow {
    pub id: Option<i64>,
    pub question_id: i64,
    pub summary: String,
}

/// One clustered misconception for a question, fully rebuilt on every
/// aggregation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedInsightRow {
    pub id: Option<i64>,
    pub question_id: i64,
    pub error_summary: String,
    pub error_count: i64,
}

/// The narrative summary for one session or homework scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeRow {
    pub id: Option<i64>,
    pub session_id: Option<i64>,
    pub homework_id: Option<i64>,
    pub summary: String,
}

/// A homework assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeworkRow {
    pub id: i64,
    pub class_id: Option<i64>,
    pub name: Option<String>,
}

/// Decode one raw row into its typed form
pub fn decode_row<T: DeserializeOwned>(relation: &str, row: Value) -> Result<T> {
    serde_json::from_value(row).map_err(|e| StoreError::Decode {
        relation: relation.to_string(),
        reason: e.to_string(),
    })
}

/// Decode a batch of raw rows into their typed form
pub fn decode_rows<T: DeserializeOwned>(relation: &str, rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| decode_row(relation, row))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_question_row_ignores_unknown_columns() {
        let row = json!({
            "id": 7,
            "session_id": 3,
            "question_text": "What is a set?",
            "answer": "A collection of distinct elements",
            "created_at": "2025-01-01T00:00:00Z",
            "extra_column": true
        });

        let question: QuestionRow = decode_row(relations::SESSION_QUESTIONS, row).unwrap();
        assert_eq!(question.id, 7);
        assert_eq!(question.session_id, Some(3));
        assert_eq!(question.max_points(), 1);
        assert!(question.explanation.is_none());
    }

    #[test]
    fn test_decode_missing_required_column_fails() {
        let row = json!({ "id": 7, "session_id": 3 });
        let result: Result<QuestionRow> = decode_row(relations::SESSION_QUESTIONS, row);
        assert!(matches!(result, Err(StoreError::Decode { .. })));
    }
}
