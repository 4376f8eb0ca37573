// Hosted model capabilities used by ingestion and answering

pub mod cohere;

use async_trait::async_trait;
use thiserror::Error;

pub use cohere::CohereClient;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider rejected the credentials (HTTP {0})")]
    Auth(u16),
    #[error("Transient provider failure: {0}")]
    Transient(String),
    #[error("Provider rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("Provider request timed out")]
    Timeout,
}

impl ProviderError {
    /// Whether repeating the same request may succeed
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_) | ProviderError::Timeout)
    }
}

/// Some embedding models encode stored passages and search queries differently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Document,
    Query,
}

/// Maps texts to fixed-length vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One vector per input, in input order, all of the same length
    async fn embed(&self, texts: &[String], kind: InputKind)
    -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Text completion
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}
