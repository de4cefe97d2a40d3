use crate::alignment::AlignerConfig;
use crate::fetch::FetchConfig;
use crate::generation::GenerationConfig;
use crate::grading::GradingConfig;
use crate::insights::AggregationConfig;
use crate::llm::{ModelConfig, ModelProvider};
use crate::transcribe::TranscriptionConfig;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the lecture companion pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Workspace layout and batch limits
    pub workspace: WorkspaceConfig,

    /// Frame sampling, slide rendering and OCR settings
    pub extraction: ExtractionConfig,

    /// Slide-to-frame alignment settings
    pub aligner: AlignerConfig,

    /// Generative model settings
    pub model: ModelConfig,

    /// Record store settings
    pub store: StoreConfig,

    /// Whisper transcription settings
    pub transcription: TranscriptionConfig,

    /// Artifact download settings
    pub fetch: FetchConfig,

    /// Question generation settings
    pub generation: GenerationConfig,

    /// Answer grading settings
    pub grading: GradingConfig,

    /// Insight aggregation settings
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directory holding one subdirectory per ingested lecture
    pub root: PathBuf,

    /// Concurrent lectures during batch ingest
    pub max_concurrent_lectures: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./workspace"),
            max_concurrent_lectures: num_cpus::get().min(4),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Seconds between sampled video frames
    pub frame_interval_seconds: f64,

    /// Render resolution for slide pages
    pub render_dpi: u32,

    /// OCR language passed to tesseract
    pub ocr_language: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            frame_interval_seconds: 30.0,
            render_dpi: 150,
            ocr_language: "eng".to_string(),
        }
    }
}

/// Record store connection settings (PostgREST-style backend)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the REST record store
    pub base_url: String,

    /// API key sent as both `apikey` and bearer token
    pub api_key: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            timeout_seconds: 30,
        }
    }
}

impl Config {
    /// Load configuration from the usual file locations, falling back to
    /// environment variables.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "lecture-companion.toml",
            "config/lecture-companion.toml",
            "~/.config/lecture-companion/config.toml",
            "/etc/lecture-companion/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;
        let config = toml::from_str(&config_str)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        tracing::info!("📄 Loaded configuration from: {}", path);
        Ok(config)
    }

    /// Build configuration from defaults plus environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("LECTURE_WORKSPACE") {
            config.workspace.root = PathBuf::from(root);
        }

        if let Ok(workers) = std::env::var("LECTURE_WORKERS") {
            config.workspace.max_concurrent_lectures = workers.parse().unwrap_or(4);
        }

        if let Ok(interval) = std::env::var("LECTURE_FRAME_INTERVAL") {
            config.extraction.frame_interval_seconds = interval.parse().unwrap_or(30.0);
        }

        if let Ok(url) = std::env::var("LECTURE_STORE_URL") {
            config.store.base_url = url;
        }

        if let Ok(key) = std::env::var("LECTURE_STORE_KEY") {
            config.store.api_key = key;
        }

        if let Ok(provider) = std::env::var("LECTURE_MODEL_PROVIDER") {
            config.model.provider = match provider.to_lowercase().as_str() {
                "openai" => ModelProvider::OpenAI,
                _ => ModelProvider::Gemini,
            };
        }

        if let Ok(model) = std::env::var("LECTURE_MODEL") {
            config.model.model = model;
        }

        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if config.model.provider == ModelProvider::Gemini {
                config.model.api_key = Some(key);
            }
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if config.model.provider == ModelProvider::OpenAI {
                config.model.api_key = Some(key.clone());
            }
            // Whisper transcription always goes through the OpenAI endpoint
            config.transcription.api_key = key;
        }

        if let Ok(count) = std::env::var("LECTURE_QUESTION_COUNT") {
            config.generation.question_count = count.parse().unwrap_or(3);
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.workspace.max_concurrent_lectures == 0 {
            return Err(anyhow!("max_concurrent_lectures must be greater than 0"));
        }

        if self.extraction.frame_interval_seconds <= 0.0 {
            return Err(anyhow!("frame_interval_seconds must be positive"));
        }

        if self.extraction.render_dpi == 0 {
            return Err(anyhow!("render_dpi must be greater than 0"));
        }

        if self.aligner.window == 0 {
            return Err(anyhow!("aligner window must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.aligner.min_match_score) {
            return Err(anyhow!("min_match_score must be between 0.0 and 1.0"));
        }

        if self.generation.question_count == 0 {
            return Err(anyhow!("question_count must be greater than 0"));
        }

        if self.grading.max_concurrent_questions == 0 {
            return Err(anyhow!("max_concurrent_questions must be greater than 0"));
        }

        if !self.workspace.root.exists() {
            if let Err(e) = std::fs::create_dir_all(&self.workspace.root) {
                return Err(anyhow!("Cannot create workspace directory: {}", e));
            }
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Lecture Companion Configuration:\n\
            - Workspace: {}\n\
            - Frame Interval: {:.0}s\n\
            - Match Threshold: {:.2}\n\
            - Model Provider: {:?} ({})\n\
            - Record Store: {}\n\
            - Questions per Request: {}\n\
            - Concurrent Graders: {}",
            self.workspace.root.display(),
            self.extraction.frame_interval_seconds,
            self.aligner.min_match_score,
            self.model.provider,
            self.model.model,
            if self.store.base_url.is_empty() {
                "in-memory"
            } else {
                &self.store.base_url
            },
            self.generation.question_count,
            self.grading.max_concurrent_questions,
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_workspace(mut self, root: PathBuf) -> Self {
        self.config.workspace.root = root;
        self
    }

    pub fn with_frame_interval(mut self, seconds: f64) -> Self {
        self.config.extraction.frame_interval_seconds = seconds;
        self
    }

    pub fn with_store(mut self, base_url: String, api_key: String) -> Self {
        self.config.store.base_url = base_url;
        self.config.store.api_key = api_key;
        self
    }

    pub fn with_model_provider(mut self, provider: ModelProvider) -> Self {
        self.config.model.provider = provider;
        self
    }

    pub fn with_model_api_key(mut self, api_key: String) -> Self {
        self.config.model.api_key = Some(api_key);
        self
    }

    pub fn with_question_count(mut self, count: u32) -> Self {
        self.config.generation.question_count = count;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workspace.max_concurrent_lectures = workers;
        self.config.grading.max_concurrent_questions = workers;
        self.config.aggregation.max_concurrent_questions = workers;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.extraction.frame_interval_seconds, 30.0);
        assert_eq!(config.aligner.min_match_score, 0.30);
        assert_eq!(config.aligner.window, 5);
        assert_eq!(config.generation.question_count, 3);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_frame_interval(15.0)
            .with_question_count(5)
            .with_workers(2)
            .build();

        assert_eq!(config.extraction.frame_interval_seconds, 15.0);
        assert_eq!(config.generation.question_count, 5);
        assert_eq!(config.grading.max_concurrent_questions, 2);
    }

    #[test]
    fn test_validation_rejects_zero_window() {
        let mut config = Config::default();
        config.workspace.root = std::env::temp_dir();
        config.aligner.window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.workspace.root = std::env::temp_dir();
        config.aligner.min_match_score = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path_str = path.to_str().unwrap();

        let mut config = Config::default();
        config.generation.question_count = 5;
        config.store.base_url = "https://records.example.edu".to_string();
        config.save(path_str).unwrap();

        let loaded = Config::load_from_file(path_str).unwrap();
        assert_eq!(loaded.generation.question_count, 5);
        assert_eq!(loaded.store.base_url, "https://records.example.edu");
    }
}
