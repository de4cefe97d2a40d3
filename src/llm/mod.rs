pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Error types for generative-model calls
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("empty response from {0}")]
    EmptyResponse(&'static str),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Model provider types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModelProvider {
    Gemini,
    OpenAI,
}

/// Generative model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    /// Override for the provider's default endpoint (OpenAI-compatible
    /// gateways, local proxies).
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Gemini,
            endpoint: None,
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            max_tokens: 4096,
            temperature: 0.2,
            timeout_seconds: 120,
        }
    }
}

/// One part of a prompt: plain text or an inline image.
///
/// Images are raw JPEG bytes here; each provider encodes them into its own
/// wire format (base64 `inline_data` for Gemini, data-URI `image_url` for
/// OpenAI).
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    ImageJpeg(Vec<u8>),
}

/// Chat message for model communication
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub parts: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            parts: vec![ContentPart::Text(content.into())],
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![ContentPart::Text(content.into())],
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: "user".to_string(),
            parts,
        }
    }
}

/// Model response
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: String,
    pub tokens_used: Option<u32>,
}

/// Trait for generative model providers
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<ModelResponse>;
    async fn is_available(&self) -> bool;
    fn provider_type(&self) -> ModelProvider;
}

/// Create a model instance based on configuration
pub fn create_model(config: &ModelConfig) -> Result<Box<dyn GenerativeModel>> {
    match config.provider {
        ModelProvider::Gemini => Ok(Box::new(providers::GeminiModel::new(config.clone())?)),
        ModelProvider::OpenAI => Ok(Box::new(providers::OpenAIModel::new(config.clone())?)),
    }
}

/// Clean a model response by removing markdown code blocks and extra whitespace
pub fn clean_model_response(content: &str) -> String {
    let content = content.trim();

    // Remove markdown code blocks (```json ... ``` or ``` ... ```)
    if content.starts_with("```") {
        if let Some(start) = content.find('\n') {
            if let Some(end) = content.rfind("```") {
                if end > start {
                    return content[start + 1..end].trim().to_string();
                }
            }
        }
    }

    // Remove any remaining backticks and extra whitespace
    content.replace("```", "").trim().to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_model_response_with_markdown() {
        let input = "```json\n[{\"question\": \"What is a set?\", \"answer\": \"A collection\"}]\n```";
        let expected = "[{\"question\": \"What is a set?\", \"answer\": \"A collection\"}]";
        assert_eq!(clean_model_response(input), expected);
    }

    #[test]
    fn test_clean_model_response_without_markdown() {
        let input = "[{\"question\": \"What is a set?\"}]";
        assert_eq!(clean_model_response(input), input);
    }

    #[test]
    fn test_clean_model_response_with_extra_backticks() {
        let input = "```{\"topics\": [\"Sets\"]}```";
        let expected = "{\"topics\": [\"Sets\"]}";
        assert_eq!(clean_model_response(input), expected);
    }

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.provider, ModelProvider::Gemini);
        assert!(config.api_key.is_none());
        assert!(config.timeout_seconds > 0);
    }
}
