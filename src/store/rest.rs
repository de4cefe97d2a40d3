use super::{Filter, RecordStore, Result, StoreError};
use crate::config::StoreConfig;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// PostgREST-style record store backend.
///
/// Every relation maps to `{base_url}/{relation}`; equality filters become
/// `column=eq.value` query pairs. Writes ask for the stored representation
/// back so callers see server-assigned ids.
pub struct RestStore {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RestStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(StoreError::Configuration(
                "record store base_url not configured".to_string(),
            ));
        }
        if config.api_key.is_empty() {
            return Err(StoreError::Configuration(
                "record store api_key not configured".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn url(&self, relation: &str) -> String {
        format!("{}/{}", self.base_url, relation)
    }

    fn query_pairs(filters: &[Filter]) -> Vec<(String, String)> {
        filters
            .iter()
            .map(|f| (f.column.clone(), format!("eq.{}", filter_value(&f.value))))
            .collect()
    }

    fn request(&self, method: reqwest::Method, relation: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(relation))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", &self.api_key))
    }

    async fn check(relation: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                relation: relation.to_string(),
                status,
                body,
            });
        }
        Ok(response)
    }
}

/// Render a filter value the way it appears in a query string
fn filter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl RecordStore for RestStore {
    async fn insert(&self, relation: &str, row: Value) -> Result<Value> {
        debug!("INSERT into {}", relation);

        let response = self
            .request(reqwest::Method::POST, relation)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let response = Self::check(relation, response).await?;

        let mut rows: Vec<Value> = response.json().await?;
        if rows.is_empty() {
            return Err(StoreError::EmptyInsert(relation.to_string()));
        }
        Ok(rows.remove(0))
    }

    async fn select(&self, relation: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(Self::query_pairs(filters));

        let response = self
            .request(reqwest::Method::GET, relation)
            .query(&query)
            .send()
            .await?;
        let response = Self::check(relation, response).await?;

        Ok(response.json().await?)
    }

    async fn update(&self, relation: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        debug!("UPDATE {} with {} filters", relation, filters.len());

        let response = self
            .request(reqwest::Method::PATCH, relation)
            .header("Prefer", "return=representation")
            .query(&Self::query_pairs(filters))
            .json(&patch)
            .send()
            .await?;
        let response = Self::check(relation, response).await?;

        Ok(response.json().await?)
    }

    async fn delete(&self, relation: &str, filters: &[Filter]) -> Result<()> {
        debug!("DELETE from {} with {} filters", relation, filters.len());

        let response = self
            .request(reqwest::Method::DELETE, relation)
            .query(&Self::query_pairs(filters))
            .send()
            .await?;
        Self::check(relation, response).await?;

        Ok(())
    }
}
