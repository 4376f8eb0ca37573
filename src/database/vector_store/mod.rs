// Vector index abstraction shared by the in-memory and LanceDB backends


use async_trait::async_trait;
use std::cmp::Ordering;
use thiserror::Error;
use uuid::Uuid;

use crate::chunking::{ChunkMetadata, TextChunk};

/// Results returned by a search when the caller does not say otherwise
pub const DEFAULT_TOP_K: usize = 4;

const MAX_COLLECTION_NAME_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Collection not found: {collection}")]
    NotFound { collection: String },
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Invalid collection name '{0}' (use 1-128 letters, digits, '_' or '-')")]
    InvalidCollection(String),
    #[error("Vector storage error: {0}")]
    Storage(String),
}

/// A chunk with its embedding, owned by exactly one collection
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

impl EmbeddedChunk {
    #[inline]
    pub fn new(chunk: TextChunk, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: chunk.text,
            metadata: chunk.metadata,
            embedding,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk: RetrievedChunk,
    /// Cosine similarity, higher is closer
    pub similarity_score: f32,
    /// Insertion sequence within the collection
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Empty,
    Populated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    pub name: String,
    /// Fixed by the first insert
    pub dimension: Option<usize>,
    pub len: usize,
}

impl CollectionHandle {
    #[inline]
    pub fn state(&self) -> CollectionState {
        if self.len == 0 {
            CollectionState::Empty
        } else {
            CollectionState::Populated
        }
    }
}

/// Per-collection nearest-neighbour storage.
///
/// `add` appends a whole batch or nothing. Writes to one collection are
/// serialised; searches may run alongside each other.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Idempotent; never clears existing data
    async fn create_or_get(&self, collection: &str) -> Result<CollectionHandle, IndexError>;

    /// Returns the number of chunks appended
    async fn add(&self, collection: &str, chunks: Vec<EmbeddedChunk>)
    -> Result<usize, IndexError>;

    /// At most `k` results by descending similarity, earlier inserts first on ties.
    /// Fails with [`IndexError::NotFound`] when the collection has never been populated.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchResult>, IndexError>;

    async fn count(&self, collection: &str) -> Result<usize, IndexError>;

    /// Returns whether anything was removed
    async fn delete_collection(&self, collection: &str) -> Result<bool, IndexError>;

    async fn list_collections(&self) -> Result<Vec<CollectionHandle>, IndexError>;
}

#[inline]
pub fn validate_collection_name(name: &str) -> Result<(), IndexError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_COLLECTION_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(IndexError::InvalidCollection(name.to_string()))
    }
}

#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot = x.mul_add(*y, dot);
        norm_a = x.mul_add(*x, norm_a);
        norm_b = y.mul_add(*y, norm_b);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Check that every vector in a batch has the same length as the collection's
/// established dimension, or as the first vector when none is established yet
pub(crate) fn batch_dimension(
    chunks: &[EmbeddedChunk],
    established: Option<usize>,
) -> Result<Option<usize>, IndexError> {
    let Some(first) = chunks.first() else {
        return Ok(established);
    };

    let expected = established.unwrap_or(first.embedding.len());
    if expected == 0 {
        return Err(IndexError::DimensionMismatch {
            expected: 1,
            actual: 0,
        });
    }

    if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != expected) {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: bad.embedding.len(),
        });
    }

    Ok(Some(expected))
}

/// Sort by descending score, then ascending insertion order
pub(crate) fn rank_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.seq.cmp(&b.seq))
    });
}
