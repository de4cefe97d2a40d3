//! Binary grading of free-text student answers.
//!
//! Each answer is scored by the model as either zero or the question's
//! full point value, with no partial credit. Counters update after every
//! graded answer; incorrect answers additionally get a misconception
//! insight extracted and stored for later aggregation. Session grading
//! fans out across questions with bounded concurrency while keeping the
//! answers of a single question sequential, so counter updates on one
//! question row never interleave.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, Result};
use crate::llm::{clean_model_response, ChatMessage, GenerativeModel};
use crate::parsing::{self, DocumentKind};
use crate::report::{BatchReport, UnitOutcome};
use crate::store::records::{self, relations, QuestionRow, ResponseRow, Scope};
use crate::store::{Filter, RecordStore};

/// Knobs for batch grading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingConfig {
    /// Questions graded in parallel during a session batch
    pub max_concurrent_questions: usize,
    /// Wall-clock budget for grading one answer, in seconds
    pub unit_timeout_seconds: u64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_questions: 4,
            unit_timeout_seconds: 300,
        }
    }
}

#[derive(Clone)]
pub struct AnswerGrader {
    model: Arc<dyn GenerativeModel>,
    store: Arc<dyn RecordStore>,
    config: GradingConfig,
    worker_semaphore: Arc<Semaphore>,
}

impl AnswerGrader {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        store: Arc<dyn RecordStore>,
        config: GradingConfig,
    ) -> Self {
        let workers = config.max_concurrent_questions.max(1);
        Self {
            model,
            store,
            config,
            worker_semaphore: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Grade one answer against its question, returning the awarded score.
    ///
    /// `total_submission` is incremented for every graded answer. A zero
    /// score triggers misconception extraction; a full score increments
    /// `correct_submission`.
    pub async fn grade_answer(
        &self,
        scope: Scope,
        question: &QuestionRow,
        answer_text: &str,
    ) -> Result<i64> {
        let max_points = question.max_points();
        let score = self
            .score_answer(&question.question_text, answer_text, max_points)
            .await?;

        self.bump_counter(scope, question.id, "total_submission")
            .await?;

        if score == 0 {
            self.record_misconception(scope, question.id, &question.question_text, answer_text)
                .await?;
        } else {
            self.bump_counter(scope, question.id, "correct_submission")
                .await?;
        }

        debug!(
            "Graded answer for question {}: {}/{}",
            question.id, score, max_points
        );
        Ok(score)
    }

    /// Grade every stored answer for every question in a session.
    ///
    /// A failure on one answer is recorded and grading continues; an
    /// unknown session or a failure to fetch the question set aborts the
    /// whole batch.
    pub async fn grade_session(&self, session_id: i64) -> Result<BatchReport> {
        let sessions = self
            .store
            .select(relations::SESSIONS, &[Filter::eq("id", session_id)])
            .await?;
        if sessions.is_empty() {
            return Err(PipelineError::MissingRecord {
                relation: relations::SESSIONS.to_string(),
                key: "id".to_string(),
                value: session_id.to_string(),
            });
        }

        let relation = Scope::Session.questions_relation();
        let rows = self
            .store
            .select(relation, &[Filter::eq("session_id", session_id)])
            .await?;
        let mut questions: Vec<QuestionRow> = records::decode_rows(relation, rows)?;
        questions.sort_by_key(|q| q.question_number.unwrap_or(u32::MAX));

        if questions.is_empty() {
            warn!("No questions found for session {}", session_id);
            return Ok(BatchReport::new());
        }

        info!(
            "🚀 Grading session {}: {} questions",
            session_id,
            questions.len()
        );

        let total = questions.len();
        let (tx, mut rx) = mpsc::channel(self.config.max_concurrent_questions.max(1));

        for (index, question) in questions.into_iter().enumerate() {
            let grader = self.clone();
            let tx = tx.clone();
            let semaphore = Arc::clone(&self.worker_semaphore);

            tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();

                info!(
                    "📝 Grading question {}/{} (id {})",
                    index + 1,
                    total,
                    question.id
                );
                let outcomes = grader.grade_question_answers(Scope::Session, &question).await;

                if let Err(e) = tx.send(outcomes).await {
                    error!("Failed to send grading outcomes: {}", e);
                }
            });
        }

        // Close the channel once all tasks have finished
        drop(tx);

        let mut report = BatchReport::new();
        while let Some(outcomes) = rx.recv().await {
            for outcome in outcomes {
                match &outcome {
                    UnitOutcome::Completed { unit, detail } => debug!("✅ {}: {}", unit, detail),
                    UnitOutcome::Skipped { unit, reason } => debug!("{} skipped: {}", unit, reason),
                    UnitOutcome::Failed { unit, reason } => warn!("❌ {} failed: {}", unit, reason),
                }
                report.record(outcome);
            }
        }

        info!("📊 Session {} grading: {}", session_id, report);
        Ok(report)
    }

    /// Grade one student's homework submission.
    ///
    /// The submission text is split into numbered answers and paired with
    /// the homework's stored questions by number. Numbers missing on
    /// either side are reported as skipped, not failed.
    pub async fn grade_submission(
        &self,
        homework_id: i64,
        submission_text: &str,
        student_id: Option<&str>,
    ) -> Result<BatchReport> {
        let answers = parsing::split_document(
            self.model.as_ref(),
            DocumentKind::Submission,
            submission_text,
        )
        .await?;

        let relation = Scope::Homework.questions_relation();
        let rows = self
            .store
            .select(relation, &[Filter::eq("homework_id", homework_id)])
            .await?;
        let mut questions: Vec<QuestionRow> = records::decode_rows(relation, rows)?;
        questions.sort_by_key(|q| q.question_number.unwrap_or(u32::MAX));

        if questions.is_empty() {
            return Err(PipelineError::MissingRecord {
                relation: relation.to_string(),
                key: "homework_id".to_string(),
                value: homework_id.to_string(),
            });
        }

        info!(
            "🚀 Grading submission for homework {}: {} questions, {} answers",
            homework_id,
            questions.len(),
            answers.len()
        );

        let pairs = parsing::pair_by_number(&questions, &answers);
        let budget = Duration::from_secs(self.config.unit_timeout_seconds);
        let mut report = BatchReport::new();

        for question in &questions {
            if !pairs.iter().any(|(q, _)| q.id == question.id) {
                report.record(UnitOutcome::skipped(
                    format!("question {}", question.id),
                    "no matching answer in submission",
                ));
            }
        }

        for (question, answer) in pairs {
            let unit = format!("question {}", question.id);

            if let Err(e) = self
                .store_response(Scope::Homework, question.id, &answer.text, student_id)
                .await
            {
                warn!("storing response for question {} failed: {}", question.id, e);
            }

            let graded = timeout(
                budget,
                self.grade_answer(Scope::Homework, question, &answer.text),
            )
            .await;
            report.record(match graded {
                Ok(Ok(score)) => UnitOutcome::completed(
                    unit,
                    format!("score {}/{}", score, question.max_points()),
                ),
                Ok(Err(e)) => UnitOutcome::failed(unit, e.to_string()),
                Err(_) => UnitOutcome::failed(
                    unit,
                    PipelineError::Timeout(self.config.unit_timeout_seconds).to_string(),
                ),
            });
        }

        info!("📊 Homework {} submission grading: {}", homework_id, report);
        Ok(report)
    }

    /// Grade all stored answers of one question, one outcome per answer
    async fn grade_question_answers(
        &self,
        scope: Scope,
        question: &QuestionRow,
    ) -> Vec<UnitOutcome> {
        let unit = format!("question {}", question.id);
        let responses = match self.fetch_responses(scope, question.id).await {
            Ok(responses) => responses,
            Err(e) => {
                return vec![UnitOutcome::failed(
                    unit,
                    format!("fetching answers failed: {e}"),
                )]
            }
        };

        if responses.is_empty() {
            return vec![UnitOutcome::skipped(unit, "no answers submitted")];
        }

        let budget = Duration::from_secs(self.config.unit_timeout_seconds);
        let mut outcomes = Vec::with_capacity(responses.len());
        for response in responses {
            let unit = format!("question {} answer {}", question.id, response.id);
            let graded = timeout(
                budget,
                self.grade_answer(scope, question, &response.response_text),
            )
            .await;
            outcomes.push(match graded {
                Ok(Ok(score)) => UnitOutcome::completed(
                    unit,
                    format!("score {}/{}", score, question.max_points()),
                ),
                Ok(Err(e)) => UnitOutcome::failed(unit, e.to_string()),
                Err(_) => UnitOutcome::failed(
                    unit,
                    PipelineError::Timeout(self.config.unit_timeout_seconds).to_string(),
                ),
            });
        }
        outcomes
    }

    async fn fetch_responses(&self, scope: Scope, question_id: i64) -> Result<Vec<ResponseRow>> {
        let relation = scope.responses_relation();
        let rows = self
            .store
            .select(relation, &[Filter::eq("question_id", question_id)])
            .await?;
        Ok(records::decode_rows(relation, rows)?)
    }

    /// Ask the model for a binary score. Anything but the literal 0 or
    /// max-points integer rejects the answer as unscorable.
    async fn score_answer(
        &self,
        question_text: &str,
        answer_text: &str,
        max_points: i64,
    ) -> Result<i64> {
        let messages = vec![
            ChatMessage::system(
                "You are an educational assistant helping to analyze student responses.",
            ),
            ChatMessage::user(grading_prompt(question_text, answer_text, max_points)),
        ];
        let response = self.model.generate(messages).await?;
        parse_score(&response.content, max_points)
    }

    /// Extract the main misunderstanding from an incorrect answer and
    /// append it to the scope's answer-insight relation
    async fn record_misconception(
        &self,
        scope: Scope,
        question_id: i64,
        question_text: &str,
        answer_text: &str,
    ) -> Result<()> {
        let messages = vec![
            ChatMessage::system(insight_system_message(scope)),
            ChatMessage::user(misconception_prompt(scope, question_text, answer_text)),
        ];
        let response = self.model.generate(messages).await?;

        let row = json!({
            "question_id": question_id,
            "summary": response.content,
        });
        self.store
            .insert(scope.answer_insights_relation(), row)
            .await?;
        Ok(())
    }

    /// Read-modify-write on one counter column. Answers for a question are
    /// graded sequentially, so the question row is never updated by two
    /// graders at once.
    async fn bump_counter(&self, scope: Scope, question_id: i64, column: &str) -> Result<()> {
        let relation = scope.questions_relation();
        let rows = self
            .store
            .select(relation, &[Filter::eq("id", question_id)])
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::MissingRecord {
                relation: relation.to_string(),
                key: "id".to_string(),
                value: question_id.to_string(),
            })?;

        let current = row.get(column).and_then(Value::as_i64).unwrap_or(0);
        self.store
            .update(
                relation,
                &[Filter::eq("id", question_id)],
                json!({ column: current + 1 }),
            )
            .await?;
        Ok(())
    }

    async fn store_response(
        &self,
        scope: Scope,
        question_id: i64,
        answer_text: &str,
        student_id: Option<&str>,
    ) -> Result<()> {
        let row = json!({
            "question_id": question_id,
            "response_text": answer_text,
            "student_id": student_id,
        });
        self.store.insert(scope.responses_relation(), row).await?;
        Ok(())
    }
}

fn grading_prompt(question_text: &str, answer_text: &str, max_points: i64) -> String {
    let unit = if max_points == 1 { "point" } else { "points" };
    format!(
        "Given this assignment question: {question_text} with a maximum of {max_points} {unit}\n\n\
         And this student's response: {answer_text}\n\n\
         Please analyze the student's response and respond only with a numerical score of either \
         0 or {max_points} {unit} representing whether the student's response is correct or not."
    )
}

fn misconception_prompt(scope: Scope, question_text: &str, answer_text: &str) -> String {
    let kind = match scope {
        Scope::Session => "quiz",
        Scope::Homework => "homework",
    };
    format!(
        "Given this {kind} question: {question_text}\n\n\
         And this student's answer: {answer_text}\n\n\
         Please analyze the student's answer and identify:\n\
         1. The main misunderstanding or misconception\n\
         2. Key areas where the student needs improvement\n\n\
         Provide a concise response focusing on these points."
    )
}

fn insight_system_message(scope: Scope) -> &'static str {
    match scope {
        Scope::Session => {
            "You are an educational assistant helping to analyze student answers to a learning check."
        }
        Scope::Homework => "You are an educational assistant helping to analyze student answers.",
    }
}

/// Scores are binary by contract: the literal integer 0 or max points,
/// nothing else.
fn parse_score(raw: &str, max_points: i64) -> Result<i64> {
    let cleaned = clean_model_response(raw);
    let score: i64 = cleaned.trim().parse().map_err(|_| {
        PipelineError::Validation(format!("expected a numeric score, got {cleaned:?}"))
    })?;

    if score != 0 && score != max_points {
        return Err(PipelineError::Validation(format!(
            "score must be 0 or {max_points}, got {score}"
        )));
    }
    Ok(score)
}
