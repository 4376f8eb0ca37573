
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::chunking::ChunkingConfig;
use crate::database::vector_store::validate_collection_name;
use crate::retrieval::RetrievalConfig;
use crate::synthesis::DEFAULT_PROMPT_TEMPLATE;

/// Environment variable consulted when `provider.api_key` is not set
pub const API_KEY_ENV: &str = "COHERE_API_KEY";
/// Environment variable consulted when `telegram.bot_token` is not set
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
/// Overrides the base directory (defaults to `~/.ragdesk`)
pub const HOME_ENV: &str = "RAGDESK_HOME";

const DEFAULT_ANSWER_TIMEOUT_SECONDS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_answer_timeout")]
    pub answer_timeout_seconds: u64,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_answer_timeout() -> u64 {
    DEFAULT_ANSWER_TIMEOUT_SECONDS
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            answer_timeout_seconds: DEFAULT_ANSWER_TIMEOUT_SECONDS,
            provider: ProviderConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            memory: MemoryConfig::default(),
            prompt: PromptConfig::default(),
            storage: StorageConfig::default(),
            telegram: TelegramConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

/// Hosted model settings shared by the embedding and chat endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub chat_model: String,
    pub batch_size: u32,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cohere.com".to_string(),
            api_key: None,
            embedding_model: "embed-english-v3.0".to_string(),
            chat_model: "command-r".to_string(),
            batch_size: 96,
            timeout_seconds: 30,
            retry_attempts: 3,
            temperature: 0.3,
            max_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Number of most recent turns kept per session
    pub max_turns: usize,
    /// Sessions kept at once; the least recently used one is dropped past this
    pub max_sessions: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_sessions: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    pub template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Lancedb,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            StorageBackend::Lancedb => write!(f, "lancedb"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Write JSON snapshots of in-memory collections so they survive restarts
    pub persist_snapshots: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Lancedb,
            persist_snapshots: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    /// Handle that must appear in group messages, e.g. `@acme_support_bot`
    pub bot_username: Option<String>,
    pub collection: String,
    pub greeting: String,
    pub help_text: String,
    pub poll_timeout_seconds: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            bot_token: None,
            bot_username: None,
            collection: "default_collection".to_string(),
            greeting: "Hello! Ask me anything about our services.".to_string(),
            help_text: "Send me a question and I will answer it from our knowledge base."
                .to_string(),
            poll_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid batch size: {0} (must be between 1 and 96)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid timeout: {0} seconds (must be between 1 and 600)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max tokens: {0} (must be between 1 and 8192)")]
    InvalidMaxTokens(u32),
    #[error("API key must be set in the configuration or the {API_KEY_ENV} environment variable")]
    MissingApiKey,
    #[error("Bot token must be set in the configuration or the {BOT_TOKEN_ENV} environment variable")]
    MissingBotToken,
    #[error("Invalid chunk size: {0} (must be at least 1)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    InvalidChunkOverlap { overlap: usize, size: usize },
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid query variant count: {0} (must be at most 10)")]
    InvalidQueryVariants(usize),
    #[error("max_results ({max_results}) must be at least top_k ({top_k})")]
    InvalidMaxResults { max_results: usize, top_k: usize },
    #[error("Invalid memory size: {0} turns (must be between 1 and 100)")]
    InvalidMaxTurns(usize),
    #[error("Invalid session limit: {0} (must be at least 1)")]
    InvalidMaxSessions(usize),
    #[error("Invalid prompt template: {0}")]
    InvalidTemplate(String),
    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),
    #[error("Invalid poll timeout: {0} seconds (must be between 1 and 50)")]
    InvalidPollTimeout(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Resolve the base directory: `$RAGDESK_HOME`, else `~/.ragdesk`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            return Ok(PathBuf::from(home));
        }

        dirs::home_dir()
            .map(|home| home.join(".ragdesk"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=600).contains(&self.answer_timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.answer_timeout_seconds));
        }

        self.provider.validate()?;
        self.chunking.validate()?;
        self.retrieval.validate()?;
        self.memory.validate()?;
        self.telegram.validate()?;
        crate::synthesis::PromptTemplate::new(&self.prompt.template)?;
        Ok(())
    }

    #[inline]
    pub fn answer_timeout(&self) -> Duration {
        Duration::from_secs(self.answer_timeout_seconds)
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite document registry
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("metadata.db")
    }

    /// Get the path for the LanceDB directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    /// Get the directory for in-memory index snapshots
    #[inline]
    pub fn snapshot_dir_path(&self) -> PathBuf {
        self.get_base_dir().join("collections")
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider_url()?;

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.chat_model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 96 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(1..=8192).contains(&self.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        Ok(())
    }

    /// Base URL as a directory, so endpoint paths join below any path prefix
    pub fn provider_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// The configured key, falling back to `$COHERE_API_KEY`
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        resolve_secret(self.api_key.as_deref(), API_KEY_ENV).ok_or(ConfigError::MissingApiKey)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn set_base_url(&mut self, base_url: String) -> Result<(), ConfigError> {
        let previous = std::mem::replace(&mut self.base_url, base_url);
        if let Err(e) = self.provider_url() {
            self.base_url = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn set_embedding_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.embedding_model = model;
        Ok(())
    }

    pub fn set_chat_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.chat_model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 96 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidTemperature(temperature));
        }
        self.temperature = temperature;
        Ok(())
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.max_turns) {
            return Err(ConfigError::InvalidMaxTurns(self.max_turns));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::InvalidMaxSessions(self.max_sessions));
        }
        Ok(())
    }
}

impl TelegramConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.api_base).map_err(|_| ConfigError::InvalidUrl(self.api_base.clone()))?;

        validate_collection_name(&self.collection)
            .map_err(|_| ConfigError::InvalidCollection(self.collection.clone()))?;

        if !(1..=50).contains(&self.poll_timeout_seconds) {
            return Err(ConfigError::InvalidPollTimeout(self.poll_timeout_seconds));
        }

        Ok(())
    }

    /// The configured token, falling back to `$TELEGRAM_BOT_TOKEN`
    pub fn resolve_bot_token(&self) -> Result<String, ConfigError> {
        resolve_secret(self.bot_token.as_deref(), BOT_TOKEN_ENV)
            .ok_or(ConfigError::MissingBotToken)
    }
}

fn resolve_secret(configured: Option<&str>, env_var: &str) -> Option<String> {
    configured
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .or_else(|| {
            std::env::var(env_var)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
}

/// Show only the first four characters of a secret
#[inline]
pub fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{}****", visible)
}
