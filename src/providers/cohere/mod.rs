
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use super::{EmbeddingProvider, InputKind, LanguageModel, ProviderError};
use crate::config::{ConfigError, ProviderConfig};

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Blocking client for the Cohere v1 REST API
#[derive(Debug, Clone)]
pub struct CohereClient {
    base_url: Url,
    api_key: String,
    embedding_model: String,
    chat_model: String,
    batch_size: usize,
    temperature: f32,
    max_tokens: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    input_type: &'static str,
    truncate: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    message: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

impl CohereClient {
    /// Build a client; fails without touching the network when no API key is available
    #[inline]
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let api_key = config.resolve_api_key()?;
        let base_url = config.provider_url()?;

        Ok(Self {
            base_url,
            api_key,
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            batch_size: usize::try_from(config.batch_size.max(1)).unwrap_or(1),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            agent: build_agent(config.timeout()),
            retry_attempts: config.retry_attempts.max(1),
            backoff: DEFAULT_BACKOFF,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay before the first retry; doubles on each further attempt
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Embed texts in batches of at most `batch_size`
    #[inline]
    pub fn embed_blocking(
        &self,
        texts: &[String],
        kind: InputKind,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Embedding {} texts with {} ({:?})",
            texts.len(),
            self.embedding_model,
            kind
        );

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            embeddings.extend(self.embed_batch(batch, kind)?);
        }

        let dimension = embeddings.first().map_or(0, Vec::len);
        if dimension == 0 || embeddings.iter().any(|e| e.len() != dimension) {
            return Err(ProviderError::InvalidResponse(
                "embeddings have inconsistent or zero dimensionality".to_string(),
            ));
        }

        Ok(embeddings)
    }

    /// Single-turn chat completion
    #[inline]
    pub fn chat_blocking(&self, message: &str) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.chat_model,
            message,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let response_text = self.post_with_retry("v1/chat", &body)?;
        let response: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| ProviderError::InvalidResponse(format!("chat response: {e}")))?;

        debug!("Chat completion returned {} characters", response.text.len());
        Ok(response.text)
    }

    fn embed_batch(
        &self,
        texts: &[String],
        kind: InputKind,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let request = EmbedRequest {
            model: &self.embedding_model,
            texts,
            input_type: input_type(kind),
            truncate: "END",
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let response_text = self.post_with_retry("v1/embed", &body)?;
        let response: EmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| ProviderError::InvalidResponse(format!("embed response: {e}")))?;

        if response.embeddings.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings)
    }

    fn post_with_retry(&self, endpoint: &str, body: &str) -> Result<String, ProviderError> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| ProviderError::Rejected {
                status: 0,
                message: format!("invalid endpoint {endpoint}: {e}"),
            })?;

        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!(
                "POST {} attempt {}/{}",
                url, attempt, self.retry_attempts
            );

            match self.post_once(&url, body) {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Retryable provider error: {}, attempt {}/{}",
                        e, attempt, self.retry_attempts
                    );
                    last_error = Some(e);

                    if attempt < self.retry_attempts {
                        let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
                Err(e) => {
                    warn!("Provider error, not retrying: {}", e);
                    return Err(e);
                }
            }
        }

        error!("All retry attempts failed for request to {}", url);
        Err(last_error.unwrap_or_else(|| ProviderError::Transient("no attempts made".to_string())))
    }

    fn post_once(&self, url: &Url, body: &str) -> Result<String, ProviderError> {
        let mut response = self
            .agent
            .post(url.as_str())
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .send(body)
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(transport_error)?;

        if (200..300).contains(&status) {
            Ok(text)
        } else {
            Err(classify_status(status, &text))
        }
    }
}

fn input_type(kind: InputKind) -> &'static str {
    match kind {
        InputKind::Document => "search_document",
        InputKind::Query => "search_query",
    }
}

/// Map a non-success HTTP status to a provider error
fn classify_status(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map_or_else(|_| body.trim().to_string(), |e| e.message);

    match status {
        401 | 403 => ProviderError::Auth(status),
        408 => ProviderError::Timeout,
        429 | 500..=599 => ProviderError::Transient(format!("HTTP {status}: {message}")),
        _ => ProviderError::Rejected { status, message },
    }
}

fn transport_error(error: ureq::Error) -> ProviderError {
    match error {
        ureq::Error::Timeout(_) => ProviderError::Timeout,
        ureq::Error::Io(ref io) if io.kind() == std::io::ErrorKind::TimedOut => {
            ProviderError::Timeout
        }
        other => ProviderError::Transient(other.to_string()),
    }
}

#[async_trait]
impl EmbeddingProvider for CohereClient {
    fn name(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(
        &self,
        texts: &[String],
        kind: InputKind,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let client = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.embed_blocking(&texts, kind))
            .await
            .map_err(|e| ProviderError::Transient(format!("embedding worker failed: {e}")))?
    }
}

#[async_trait]
impl LanguageModel for CohereClient {
    fn name(&self) -> &str {
        &self.chat_model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let client = self.clone();
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || client.chat_blocking(&prompt))
            .await
            .map_err(|e| ProviderError::Transient(format!("chat worker failed: {e}")))?
    }
}
