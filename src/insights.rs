//! Two-level misconception insight aggregation.
//!
//! Level one rebuilds per-question misconception clusters from the raw
//! answer insights: every existing cluster row in scope is deleted up
//! front, then each question's insights are clustered by the model and
//! reinserted, making a full pass idempotent. Level two waits for all
//! clustering to finish, then rolls the clusters up into one narrative
//! summary per session or homework, upserted in place.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::llm::{clean_model_response, ChatMessage, GenerativeModel};
use crate::report::{BatchReport, UnitOutcome};
use crate::store::records::{self, AnswerInsightRow, ExtractedInsightRow, QuestionRow, Scope};
use crate::store::{Filter, RecordStore};

/// Knobs for batch aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Questions clustered in parallel
    pub max_concurrent_questions: usize,
    /// Wall-clock budget for clustering one question, in seconds
    pub unit_timeout_seconds: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_questions: 4,
            unit_timeout_seconds: 300,
        }
    }
}

/// Result of one full aggregation pass
#[derive(Debug)]
pub struct AggregationOutcome {
    pub report: BatchReport,
    pub narrative: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MisconceptionCluster {
    error_type: String,
    error_count: i64,
}

#[derive(Debug, Deserialize)]
struct ClusterResponse {
    #[serde(default)]
    misconceptions: Vec<MisconceptionCluster>,
}

#[derive(Clone)]
pub struct InsightAggregator {
    model: Arc<dyn GenerativeModel>,
    store: Arc<dyn RecordStore>,
    config: AggregationConfig,
    worker_semaphore: Arc<Semaphore>,
}

impl InsightAggregator {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        store: Arc<dyn RecordStore>,
        config: AggregationConfig,
    ) -> Self {
        let workers = config.max_concurrent_questions.max(1);
        Self {
            model,
            store,
            config,
            worker_semaphore: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Run the full two-level roll-up for one session or homework.
    ///
    /// Returns the per-question report and the refreshed narrative, or
    /// `None` when no question in scope produced any clusters.
    pub async fn aggregate(&self, scope: Scope, owner_id: i64) -> Result<AggregationOutcome> {
        let questions = self.fetch_scope_questions(scope, owner_id).await?;
        if questions.is_empty() {
            warn!("No questions found for {} {}", scope, owner_id);
            return Ok(AggregationOutcome {
                report: BatchReport::new(),
                narrative: None,
            });
        }

        info!(
            "🚀 Aggregating insights for {} {}: {} questions",
            scope,
            owner_id,
            questions.len()
        );

        let report = self.rebuild_question_clusters(scope, &questions).await?;
        let narrative = self.publish_narrative(scope, owner_id, &questions).await?;

        info!("📊 {} {} aggregation: {}", scope, owner_id, report);
        Ok(AggregationOutcome { report, narrative })
    }

    async fn fetch_scope_questions(&self, scope: Scope, owner_id: i64) -> Result<Vec<QuestionRow>> {
        let relation = scope.questions_relation();
        let rows = self
            .store
            .select(relation, &[Filter::eq(scope.owner_column(), owner_id)])
            .await?;
        let mut questions: Vec<QuestionRow> = records::decode_rows(relation, rows)?;
        questions.sort_by_key(|q| q.question_number.unwrap_or(u32::MAX));
        Ok(questions)
    }

    /// Delete every question's existing clusters, then recluster with
    /// bounded fan-out. All deletes complete before any model call so a
    /// failed question leaves no stale rows behind.
    async fn rebuild_question_clusters(
        &self,
        scope: Scope,
        questions: &[QuestionRow],
    ) -> Result<BatchReport> {
        let relation = scope.extracted_insights_relation();
        for question in questions {
            self.store
                .delete(relation, &[Filter::eq("question_id", question.id)])
                .await?;
        }

        let (tx, mut rx) = mpsc::channel(self.config.max_concurrent_questions.max(1));
        for question in questions {
            let aggregator = self.clone();
            let tx = tx.clone();
            let semaphore = Arc::clone(&self.worker_semaphore);
            let question = question.clone();

            tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();
                let outcome = aggregator.cluster_question(scope, &question).await;
                if let Err(e) = tx.send(outcome).await {
                    error!("Failed to send aggregation outcome: {}", e);
                }
            });
        }
        drop(tx);

        // Join barrier: the narrative step must only ever see a fully
        // rebuilt cluster set.
        let mut report = BatchReport::new();
        while let Some(outcome) = rx.recv().await {
            if let UnitOutcome::Failed { unit, reason } = &outcome {
                warn!("❌ {} failed: {}", unit, reason);
            }
            report.record(outcome);
        }
        Ok(report)
    }

    /// Cluster one question's answer insights, catching every failure so
    /// the batch carries on
    async fn cluster_question(&self, scope: Scope, question: &QuestionRow) -> UnitOutcome {
        let unit = format!("question {}", question.id);
        let budget = Duration::from_secs(self.config.unit_timeout_seconds);

        match timeout(budget, self.try_cluster_question(scope, question)).await {
            Ok(Ok(None)) => UnitOutcome::skipped(unit, "no answer insights"),
            Ok(Ok(Some(count))) => UnitOutcome::completed(unit, format!("{count} clusters")),
            Ok(Err(e)) => UnitOutcome::failed(unit, e.to_string()),
            Err(_) => UnitOutcome::failed(
                unit,
                PipelineError::Timeout(self.config.unit_timeout_seconds).to_string(),
            ),
        }
    }

    async fn try_cluster_question(
        &self,
        scope: Scope,
        question: &QuestionRow,
    ) -> Result<Option<usize>> {
        let relation = scope.answer_insights_relation();
        let rows = self
            .store
            .select(relation, &[Filter::eq("question_id", question.id)])
            .await?;
        let insights: Vec<AnswerInsightRow> = records::decode_rows(relation, rows)?;
        if insights.is_empty() {
            return Ok(None);
        }

        let joined = insights
            .iter()
            .map(|insight| insight.summary.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            ChatMessage::system(
                "You are an educational analyst identifying common student misconceptions.",
            ),
            ChatMessage::user(cluster_prompt(scope, &joined)),
        ];
        let response = self.model.generate(messages).await?;
        let clusters = parse_clusters(&response.content, cluster_cap(scope))?;

        // Soft expectation only; the model is asked for exact counts but
        // never guarantees them.
        let counted: i64 = clusters.iter().map(|c| c.error_count).sum();
        if counted != insights.len() as i64 {
            warn!(
                "cluster counts for question {} sum to {} but {} insights exist",
                question.id,
                counted,
                insights.len()
            );
        }

        let extracted_relation = scope.extracted_insights_relation();
        for cluster in &clusters {
            let row = json!({
                "question_id": question.id,
                "error_summary": cluster.error_type,
                "error_count": cluster.error_count,
            });
            self.store.insert(extracted_relation, row).await?;
        }
        Ok(Some(clusters.len()))
    }

    /// Roll every question's clusters up into one narrative and upsert it
    async fn publish_narrative(
        &self,
        scope: Scope,
        owner_id: i64,
        questions: &[QuestionRow],
    ) -> Result<Option<String>> {
        let relation = scope.extracted_insights_relation();
        let mut lines = String::new();
        let mut total = 0usize;

        for question in questions {
            let rows = self
                .store
                .select(relation, &[Filter::eq("question_id", question.id)])
                .await?;
            let clusters: Vec<ExtractedInsightRow> = records::decode_rows(relation, rows)?;

            let number = question
                .question_number
                .map(|n| n.to_string())
                .unwrap_or_else(|| question.id.to_string());
            for cluster in clusters {
                lines.push_str(&insight_line(
                    &number,
                    &cluster.error_summary,
                    cluster.error_count,
                ));
                total += 1;
            }
        }

        if total == 0 {
            info!("No insights found for {} {}", scope, owner_id);
            return Ok(None);
        }

        let messages = vec![
            ChatMessage::system(narrative_system_message(scope)),
            ChatMessage::user(narrative_prompt(scope, &lines)),
        ];
        let budget = Duration::from_secs(self.config.unit_timeout_seconds);
        let response = timeout(budget, self.model.generate(messages))
            .await
            .map_err(|_| PipelineError::Timeout(self.config.unit_timeout_seconds))??;
        let summary = response.content;

        self.upsert_narrative(scope, owner_id, &summary).await?;
        info!("💾 Narrative updated for {} {}", scope, owner_id);
        Ok(Some(summary))
    }

    async fn upsert_narrative(&self, scope: Scope, owner_id: i64, summary: &str) -> Result<()> {
        let relation = scope.narrative_relation();
        let filters = [Filter::eq(scope.owner_column(), owner_id)];
        let existing = self.store.select(relation, &filters).await?;

        if existing.is_empty() {
            let mut row = Map::new();
            row.insert(scope.owner_column().to_string(), json!(owner_id));
            row.insert("summary".to_string(), json!(summary));
            self.store.insert(relation, Value::Object(row)).await?;
        } else {
            self.store
                .update(relation, &filters, json!({ "summary": summary }))
                .await?;
        }
        Ok(())
    }
}

/// Misconception clusters kept per question
fn cluster_cap(scope: Scope) -> usize {
    match scope {
        Scope::Session => 3,
        Scope::Homework => 5,
    }
}

fn insight_line(number: &str, summary: &str, count: i64) -> String {
    format!("Problem {number}: {summary} (Found in {count} responses)\n")
}

fn cluster_prompt(scope: Scope, insights: &str) -> String {
    let cap = cluster_cap(scope);
    let counting_hint = match scope {
        Scope::Session => {
            " There is one student for each Main Misunderstanding or Misconception and Key Areas for Improvement insight."
        }
        Scope::Homework => "",
    };
    format!(
        "Analyze these student answer insights and identify the most common misconceptions or errors (max {cap}):\n\
         {insights}\n\n\
         For each misconception/error, provide:\n\
         1. A clear description of the misconception that is under 8 words\n\
         2. An exact count of how many students had this misconception.{counting_hint}\n\n\
         Return the response in the following JSON format:\n\
         {{\"misconceptions\": [\n\
             {{\"error_type\": \"description of the misconception\",\n\
              \"error_count\": number of answers with this misconception}}\n\
         ]}}"
    )
}

fn narrative_prompt(scope: Scope, insights_text: &str) -> String {
    let (source, tone) = match scope {
        Scope::Session => ("a learning check quiz", "clear, simple, very concise"),
        Scope::Homework => ("a homework assignment", "clear, concise"),
    };
    format!(
        "Analyze these question-level insights from {source} and create a comprehensive summary:\n\n\
         {insights_text}\n\n\
         Please only provide:\n\
         1. A high-level summary of the main conceptual issues across all questions\n\
         2. Identify any patterns or related misconceptions across different questions\n\n\
         Format your response in a {tone} way that would be helpful for an instructor. \
         Don't leave any additional comments."
    )
}

fn narrative_system_message(scope: Scope) -> &'static str {
    match scope {
        Scope::Session => {
            "You are an educational analyst creating quiz-level summaries from question-level insights."
        }
        Scope::Homework => {
            "You are an educational analyst creating homework-level summaries from question-level insights."
        }
    }
}

/// Parse the clustering response, keeping at most `cap` clusters
fn parse_clusters(raw: &str, cap: usize) -> Result<Vec<MisconceptionCluster>> {
    let cleaned = clean_model_response(raw);
    let parsed: ClusterResponse = serde_json::from_str(&cleaned)
        .map_err(|e| PipelineError::Validation(format!("cluster response is malformed: {e}")))?;

    let mut clusters = parsed.misconceptions;
    clusters.truncate(cap);
    Ok(clusters)
}
