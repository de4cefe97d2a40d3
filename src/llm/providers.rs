use super::{
    ChatMessage, ContentPart, GenerativeModel, ModelConfig, ModelError, ModelProvider,
    ModelResponse, Result,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Gemini provider implementation
pub struct GeminiModel {
    config: ModelConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: GeminiInlineData },
}

#[derive(Debug, Serialize)]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiCandidateContent,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "totalTokenCount")]
    total_token_count: u32,
}

impl GeminiModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(ModelError::Configuration(
                "Gemini API key required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { config, client })
    }

    /// Flatten chat messages into a single Gemini content entry. Text parts
    /// are carried through in order; images become base64 inline_data parts.
    fn build_parts(messages: &[ChatMessage]) -> Vec<GeminiPart> {
        let mut parts = Vec::new();
        for msg in messages {
            for part in &msg.parts {
                match part {
                    ContentPart::Text(text) => parts.push(GeminiPart::Text { text: text.clone() }),
                    ContentPart::ImageJpeg(bytes) => parts.push(GeminiPart::InlineData {
                        inline_data: GeminiInlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: BASE64.encode(bytes),
                        },
                    }),
                }
            }
        }
        parts
    }
}

#[async_trait]
impl GenerativeModel for GeminiModel {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<ModelResponse> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| ModelError::Configuration("Gemini API key not configured".to_string()))?;

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: Self::build_parts(&messages),
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            },
        };

        let base = self
            .config
            .endpoint
            .as_deref()
            .unwrap_or(GEMINI_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            base, self.config.model, api_key
        );

        debug!("Sending request to Gemini model {}", self.config.model);

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                provider: "Gemini",
                status,
                body,
            });
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let content = gemini_response
            .candidates
            .first()
            .and_then(|c| {
                let text: String = c
                    .content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect();
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            })
            .ok_or(ModelError::EmptyResponse("Gemini"))?;

        let tokens_used = gemini_response.usage_metadata.map(|u| u.total_token_count);

        Ok(ModelResponse {
            content,
            tokens_used,
        })
    }

    async fn is_available(&self) -> bool {
        if let Some(api_key) = &self.config.api_key {
            let base = self
                .config
                .endpoint
                .as_deref()
                .unwrap_or(GEMINI_BASE_URL)
                .trim_end_matches('/');
            let url = format!("{}/models?key={}", base, api_key);

            match self.client.get(&url).send().await {
                Ok(response) => response.status().is_success(),
                Err(_) => false,
            }
        } else {
            false
        }
    }

    fn provider_type(&self) -> ModelProvider {
        ModelProvider::Gemini
    }
}

/// OpenAI provider implementation
pub struct OpenAIModel {
    config: ModelConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: Vec<OpenAIContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OpenAIContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Debug, Serialize)]
struct OpenAIImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    total_tokens: u32,
}

impl OpenAIModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(ModelError::Configuration(
                "OpenAI API key required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { config, client })
    }

    fn build_messages(messages: Vec<ChatMessage>) -> Vec<OpenAIMessage> {
        messages
            .into_iter()
            .map(|msg| OpenAIMessage {
                role: msg.role,
                content: msg
                    .parts
                    .into_iter()
                    .map(|part| match part {
                        ContentPart::Text(text) => OpenAIContentPart::Text { text },
                        ContentPart::ImageJpeg(bytes) => OpenAIContentPart::ImageUrl {
                            image_url: OpenAIImageUrl {
                                url: format!("data:image/jpeg;base64,{}", BASE64.encode(&bytes)),
                            },
                        },
                    })
                    .collect(),
            })
            .collect()
    }
}

#[async_trait]
impl GenerativeModel for OpenAIModel {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<ModelResponse> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| ModelError::Configuration("OpenAI API key not configured".to_string()))?;

        let request = OpenAIRequest {
            model: self.config.model.clone(),
            messages: Self::build_messages(messages),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let url = self
            .config
            .endpoint
            .clone()
            .unwrap_or_else(|| OPENAI_CHAT_URL.to_string());

        debug!("Sending request to OpenAI model {}", self.config.model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                provider: "OpenAI",
                status,
                body,
            });
        }

        let openai_response: OpenAIResponse = response.json().await?;

        let content = openai_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or(ModelError::EmptyResponse("OpenAI"))?;

        let tokens_used = openai_response.usage.map(|u| u.total_tokens);

        Ok(ModelResponse {
            content,
            tokens_used,
        })
    }

    async fn is_available(&self) -> bool {
        if let Some(api_key) = &self.config.api_key {
            let url = "https://api.openai.com/v1/models";

            match self
                .client
                .get(url)
                .header("Authorization", format!("Bearer {}", api_key))
                .send()
                .await
            {
                Ok(response) => response.status().is_success(),
                Err(_) => false,
            }
        } else {
            false
        }
    }

    fn provider_type(&self) -> ModelProvider {
        ModelProvider::OpenAI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_requires_api_key() {
        let config = ModelConfig {
            provider: ModelProvider::Gemini,
            api_key: None,
            ..Default::default()
        };
        assert!(GeminiModel::new(config).is_err());
    }

    #[test]
    fn test_openai_requires_api_key() {
        let config = ModelConfig {
            provider: ModelProvider::OpenAI,
            api_key: None,
            ..Default::default()
        };
        assert!(OpenAIModel::new(config).is_err());
    }

    #[test]
    fn test_gemini_parts_include_inline_images() {
        let messages = vec![ChatMessage::user_parts(vec![
            ContentPart::Text("Slide 1".to_string()),
            ContentPart::ImageJpeg(vec![0xFF, 0xD8, 0xFF]),
        ])];
        let parts = GeminiModel::build_parts(&messages);
        assert_eq!(parts.len(), 2);
        match &parts[1] {
            GeminiPart::InlineData { inline_data } => {
                assert_eq!(inline_data.mime_type, "image/jpeg");
                assert!(!inline_data.data.is_empty());
            }
            _ => panic!("expected inline image part"),
        }
    }
}
