use thiserror::Error;

use crate::config::ConfigError;
use crate::database::vector_store::IndexError;
use crate::loader::LoadError;
use crate::providers::ProviderError;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Index error: {0}")]
    Index(#[source] IndexError),

    #[error("Collection not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<IndexError> for RagError {
    #[inline]
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::NotFound { collection } => Self::NotFound(collection),
            other => Self::Index(other),
        }
    }
}

pub mod channels;
pub mod chunking;
pub mod commands;
pub mod config;
pub mod database;
pub mod loader;
pub mod memory;
pub mod pipeline;
pub mod providers;
pub mod retrieval;
pub mod synthesis;
