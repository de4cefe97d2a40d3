use super::{Filter, RecordStore, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory record store.
///
/// Backs tests and offline runs with the same trait contract as the REST
/// backend: per-row atomicity, equality filters, no cross-row transactions.
/// Rows inserted without an `id` get a process-local autoincrement one.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    relations: Arc<RwLock<HashMap<String, Vec<Value>>>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            relations: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Seed a relation with prebuilt rows, keeping the id counter ahead of
    /// any ids they carry.
    pub async fn seed(&self, relation: &str, rows: Vec<Value>) {
        for row in &rows {
            if let Some(id) = row.get("id").and_then(Value::as_i64) {
                self.next_id.fetch_max(id + 1, Ordering::SeqCst);
            }
        }
        self.relations
            .write()
            .await
            .entry(relation.to_string())
            .or_default()
            .extend(rows);
    }

    fn matches(row: &Value, filters: &[Filter]) -> bool {
        filters
            .iter()
            .all(|f| row.get(&f.column) == Some(&f.value))
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert(&self, relation: &str, mut row: Value) -> Result<Value> {
        if let Some(obj) = row.as_object_mut() {
            if !obj.contains_key("id") {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                obj.insert("id".to_string(), Value::from(id));
            }
        }

        let mut relations = self.relations.write().await;
        relations
            .entry(relation.to_string())
            .or_default()
            .push(row.clone());

        Ok(row)
    }

    async fn select(&self, relation: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        let relations = self.relations.read().await;
        let rows = relations
            .get(relation)
            .map(|rows| {
                rows.iter()
                    .filter(|row| Self::matches(row, filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(rows)
    }

    async fn update(&self, relation: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        let mut relations = self.relations.write().await;
        let mut updated = Vec::new();

        if let Some(rows) = relations.get_mut(relation) {
            for row in rows.iter_mut() {
                if !Self::matches(row, filters) {
                    continue;
                }
                if let (Some(obj), Some(patch_obj)) = (row.as_object_mut(), patch.as_object()) {
                    for (key, value) in patch_obj {
                        obj.insert(key.clone(), value.clone());
                    }
                }
                updated.push(row.clone());
            }
        }

        Ok(updated)
    }

    async fn delete(&self, relation: &str, filters: &[Filter]) -> Result<()> {
        let mut relations = self.relations.write().await;
        if let Some(rows) = relations.get_mut(relation) {
            rows.retain(|row| !Self::matches(row, filters));
        }

        Ok(())
    }
}
