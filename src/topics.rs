//! Topic taxonomy: question categorization and syllabus extraction.
//!
//! Categorization follows an "always categorize" policy: when the model
//! returns titles matching nothing in the known set, the first topic in
//! scope is assigned as a last resort. Occasional misassignment beats an
//! uncategorized question.

use crate::error::Result;
use crate::llm::{clean_model_response, ChatMessage, GenerativeModel};
use crate::store::records::{self, relations, TopicRow};
use crate::store::{Filter, RecordStore};
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

/// Taxonomy used when syllabus extraction fails outright
const FALLBACK_TOPICS: [&str; 3] = ["Course Introduction", "Basic Concepts", "Advanced Topics"];

/// All topics in scope for a course, in stored order
pub async fn fetch_topics(store: &dyn RecordStore, class_id: i64) -> Result<Vec<TopicRow>> {
    let rows = store
        .select(relations::TOPICS, &[Filter::eq("class_id", class_id)])
        .await?;
    Ok(records::decode_rows(relations::TOPICS, rows)?)
}

fn categorization_prompt(topics: &[TopicRow], question: &str, explanation: &str) -> String {
    let topic_context = topics
        .iter()
        .map(|topic| format!("- {}", topic.title))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are an expert at categorizing educational content.\n\
         Given a question and its explanation, determine which topics from the list below are relevant.\n\
         A question can belong to multiple topics if it spans multiple concepts.\n\n\
         Available Topics:\n{}\n\n\
         Question: {}\n\
         Explanation: {}\n\n\
         Return ONLY a JSON array of topic titles that are relevant to this question. Consider:\n\
         1. The main concept being tested\n\
         2. Related concepts needed to answer the question\n\
         3. Concepts mentioned in the explanation\n\n\
         Return the array in this exact format (no other text):\n\
         [\"Topic 1\", \"Topic 2\"]",
        topic_context, question, explanation
    )
}

/// Resolve the topic ids relevant to one question.
///
/// Model output is mapped back to ids by exact title match. Zero matches,
/// unparseable output and model failures all degrade to the first topic in
/// scope; an empty scope yields no ids at all.
pub async fn categorize_question(
    model: &dyn GenerativeModel,
    topics: &[TopicRow],
    question: &str,
    explanation: &str,
) -> Vec<i64> {
    if topics.is_empty() {
        return Vec::new();
    }

    let fallback = vec![topics[0].id];
    let prompt = categorization_prompt(topics, question, explanation);

    let response = match model.generate(vec![ChatMessage::user(prompt)]).await {
        Ok(response) => response,
        Err(e) => {
            warn!("topic categorization call failed: {}", e);
            return fallback;
        }
    };

    let cleaned = clean_model_response(&response.content);
    let titles: Vec<String> = match serde_json::from_str(&cleaned) {
        Ok(titles) => titles,
        Err(e) => {
            warn!("topic categorization returned non-JSON titles: {}", e);
            return fallback;
        }
    };

    let by_title: HashMap<&str, i64> = topics
        .iter()
        .map(|topic| (topic.title.as_str(), topic.id))
        .collect();

    let topic_ids: Vec<i64> = titles
        .iter()
        .filter_map(|title| by_title.get(title.as_str()).copied())
        .collect();

    if topic_ids.is_empty() {
        return fallback;
    }
    topic_ids
}

fn syllabus_prompt() -> &'static str {
    "You are an expert at analyzing course syllabi and identifying the core concepts and \
     recurring themes that appear throughout the course.\n\
     Identify fundamental topics and concepts that:\n\
     1. Form the foundation of the subject matter\n\
     2. Appear repeatedly across different sections\n\
     3. Are referenced in multiple assignments or exam questions\n\
     4. Connect different parts of the course together\n\n\
     Make topics specific enough to be meaningful but general enough to span multiple lectures.\n\
     Return ONLY a JSON array of 5 to 10 topic title strings, no other text."
}

/// Extract a flat topic list from raw syllabus text, falling back to a
/// static starter taxonomy when the model gives nothing usable.
pub async fn extract_topics_from_syllabus(
    model: &dyn GenerativeModel,
    syllabus_text: &str,
) -> Vec<String> {
    let fallback = || FALLBACK_TOPICS.iter().map(|t| t.to_string()).collect();

    let messages = vec![
        ChatMessage::system(syllabus_prompt()),
        ChatMessage::user(format!(
            "Extract the core topics from this syllabus:\n\n{}",
            syllabus_text
        )),
    ];

    let response = match model.generate(messages).await {
        Ok(response) => response,
        Err(e) => {
            warn!("syllabus topic extraction failed: {}", e);
            return fallback();
        }
    };

    let cleaned = clean_model_response(&response.content);
    match serde_json::from_str::<Vec<String>>(&cleaned) {
        Ok(titles) if !titles.is_empty() => titles,
        Ok(_) => {
            warn!("syllabus topic extraction returned an empty list");
            fallback()
        }
        Err(e) => {
            warn!("syllabus topic extraction returned non-JSON titles: {}", e);
            fallback()
        }
    }
}

/// Persist extracted topic titles for a course, returning the stored rows
pub async fn store_topics(
    store: &dyn RecordStore,
    class_id: i64,
    titles: &[String],
) -> Result<Vec<TopicRow>> {
    let mut stored = Vec::with_capacity(titles.len());
    for title in titles {
        let row = store
            .insert(
                relations::TOPICS,
                json!({ "title": title, "class_id": class_id }),
            )
            .await?;
        stored.push(records::decode_row(relations::TOPICS, row)?);
    }

    info!("📚 Stored {} topics for class {}", stored.len(), class_id);
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_support::ScriptedModel;
    use crate::store::memory::InMemoryStore;

    fn topic_fixture() -> Vec<TopicRow> {
        vec![
            TopicRow {
                id: 11,
                title: "Set Operations".to_string(),
                class_id: Some(1),
            },
            TopicRow {
                id: 12,
                title: "Venn Diagrams".to_string(),
                class_id: Some(1),
            },
            TopicRow {
                id: 13,
                title: "Propositional Logic".to_string(),
                class_id: Some(1),
            },
        ]
    }

    #[tokio::test]
    async fn test_matched_titles_map_to_ids() {
        let model = ScriptedModel::new(&[r#"["Venn Diagrams", "Propositional Logic"]"#]);
        let ids = categorize_question(&model, &topic_fixture(), "q", "e").await;
        assert_eq!(ids, vec![12, 13]);
    }

    #[tokio::test]
    async fn test_unknown_titles_fall_back_to_first_topic() {
        let model = ScriptedModel::new(&[r#"["Knot Theory", "Galois Groups"]"#]);
        let ids = categorize_question(&model, &topic_fixture(), "q", "e").await;
        assert_eq!(ids, vec![11]);
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_first_topic() {
        let model = ScriptedModel::empty();
        let ids = categorize_question(&model, &topic_fixture(), "q", "e").await;
        assert_eq!(ids, vec![11]);
    }

    #[tokio::test]
    async fn test_empty_scope_yields_no_ids() {
        let model = ScriptedModel::new(&[r#"["Anything"]"#]);
        let ids = categorize_question(&model, &[], "q", "e").await;
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_fenced_titles_are_cleaned_before_parsing() {
        let model = ScriptedModel::new(&["```json\n[\"Set Operations\"]\n```"]);
        let ids = categorize_question(&model, &topic_fixture(), "q", "e").await;
        assert_eq!(ids, vec![11]);
    }

    #[tokio::test]
    async fn test_syllabus_extraction_parses_titles() {
        let model = ScriptedModel::new(&[r#"["Sets", "Relations", "Functions", "Graphs", "Counting"]"#]);
        let titles = extract_topics_from_syllabus(&model, "syllabus text").await;
        assert_eq!(titles.len(), 5);
        assert_eq!(titles[0], "Sets");
    }

    #[tokio::test]
    async fn test_syllabus_extraction_failure_uses_static_fallback() {
        let model = ScriptedModel::new(&["not json at all"]);
        let titles = extract_topics_from_syllabus(&model, "syllabus text").await;
        assert_eq!(
            titles,
            vec!["Course Introduction", "Basic Concepts", "Advanced Topics"]
        );
    }

    #[tokio::test]
    async fn test_store_topics_round_trip() {
        let store = InMemoryStore::new();
        let titles = vec!["Sets".to_string(), "Logic".to_string()];
        let stored = store_topics(&store, 1, &titles).await.unwrap();

        assert_eq!(stored.len(), 2);
        let fetched = fetch_topics(&store, 1).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].title, "Sets");
    }
}
