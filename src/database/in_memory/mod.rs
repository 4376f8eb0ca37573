
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::vector_store::{
    CollectionHandle, EmbeddedChunk, IndexError, RetrievedChunk, SearchResult, VectorIndex,
    batch_dimension, cosine_similarity, rank_results, validate_collection_name,
};
use crate::chunking::ChunkMetadata;

const SNAPSHOT_EXTENSION: &str = "json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    seq: u64,
    id: String,
    text: String,
    metadata: ChunkMetadata,
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collection {
    dimension: Option<usize>,
    next_seq: u64,
    chunks: Vec<StoredChunk>,
}

/// Borrowed view used to write a snapshot before the batch is committed
#[derive(Serialize)]
struct SnapshotView<'a> {
    dimension: Option<usize>,
    next_seq: u64,
    chunks: Vec<&'a StoredChunk>,
}

type SharedCollection = Arc<RwLock<Collection>>;

/// Brute-force cosine index held in memory, optionally mirrored to JSON snapshots
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, SharedCollection>>,
    snapshot_dir: Option<PathBuf>,
}

impl InMemoryIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist every collection as `<dir>/<collection>.json` and reload on demand
    #[inline]
    pub fn with_snapshots<P: Into<PathBuf>>(dir: P) -> Result<Self, IndexError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            IndexError::Storage(format!(
                "Failed to create snapshot directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        Ok(Self {
            collections: RwLock::default(),
            snapshot_dir: Some(dir),
        })
    }

    fn snapshot_path(&self, collection: &str) -> Option<PathBuf> {
        self.snapshot_dir
            .as_ref()
            .map(|dir| dir.join(format!("{collection}.{SNAPSHOT_EXTENSION}")))
    }

    /// Look up a collection, loading its snapshot if one exists
    async fn existing(&self, collection: &str) -> Result<Option<SharedCollection>, IndexError> {
        let cached = self.collections.read().await.get(collection).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let Some(path) = self.snapshot_path(collection).filter(|p| p.exists()) else {
            return Ok(None);
        };

        let loaded = load_snapshot(&path).await?;
        debug!(
            "Loaded snapshot for collection {} ({} chunks)",
            collection,
            loaded.chunks.len()
        );

        let mut collections = self.collections.write().await;
        let entry = collections
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(loaded)));
        Ok(Some(Arc::clone(entry)))
    }

    async fn get_or_insert(&self, collection: &str) -> Result<SharedCollection, IndexError> {
        if let Some(existing) = self.existing(collection).await? {
            return Ok(existing);
        }

        let mut collections = self.collections.write().await;
        let entry = collections
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Collection::default())));
        Ok(Arc::clone(entry))
    }

    async fn write_snapshot(
        &self,
        collection: &str,
        view: &SnapshotView<'_>,
    ) -> Result<(), IndexError> {
        let Some(path) = self.snapshot_path(collection) else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(view)
            .map_err(|e| IndexError::Storage(format!("Failed to serialize snapshot: {e}")))?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, bytes).await.map_err(|e| {
            IndexError::Storage(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            IndexError::Storage(format!("Failed to replace {}: {}", path.display(), e))
        })?;

        Ok(())
    }

    async fn snapshot_names(&self) -> Result<Vec<String>, IndexError> {
        let Some(dir) = self.snapshot_dir.as_ref() else {
            return Ok(Vec::new());
        };

        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            IndexError::Storage(format!("Failed to read {}: {}", dir.display(), e))
        })?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| IndexError::Storage(e.to_string()))?
        {
            let path = entry.path();
            let is_snapshot = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(SNAPSHOT_EXTENSION));
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if is_snapshot && validate_collection_name(stem).is_ok() {
                names.push(stem.to_string());
            }
        }

        Ok(names)
    }
}

async fn load_snapshot(path: &Path) -> Result<Collection, IndexError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| IndexError::Storage(format!("Failed to read {}: {}", path.display(), e)))?;

    serde_json::from_slice(&bytes).map_err(|e| {
        IndexError::Storage(format!("Corrupt snapshot {}: {}", path.display(), e))
    })
}

fn handle_for(name: &str, collection: &Collection) -> CollectionHandle {
    CollectionHandle {
        name: name.to_string(),
        dimension: collection.dimension,
        len: collection.chunks.len(),
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_or_get(&self, collection: &str) -> Result<CollectionHandle, IndexError> {
        validate_collection_name(collection)?;
        let shared = self.get_or_insert(collection).await?;
        let guard = shared.read().await;
        Ok(handle_for(collection, &guard))
    }

    async fn add(
        &self,
        collection: &str,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<usize, IndexError> {
        validate_collection_name(collection)?;
        let shared = self.get_or_insert(collection).await?;
        let mut guard = shared.write().await;

        let dimension = batch_dimension(&chunks, guard.dimension)?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let added = chunks.len();
        let mut next_seq = guard.next_seq;
        let new_chunks: Vec<StoredChunk> = chunks
            .into_iter()
            .map(|chunk| {
                let stored = StoredChunk {
                    seq: next_seq,
                    id: chunk.id,
                    text: chunk.text,
                    metadata: chunk.metadata,
                    embedding: chunk.embedding,
                };
                next_seq += 1;
                stored
            })
            .collect();

        let view = SnapshotView {
            dimension,
            next_seq,
            chunks: guard.chunks.iter().chain(&new_chunks).collect(),
        };
        self.write_snapshot(collection, &view).await?;

        guard.dimension = dimension;
        guard.next_seq = next_seq;
        guard.chunks.extend(new_chunks);

        info!(
            "Added {} chunks to collection {} ({} total)",
            added,
            collection,
            guard.chunks.len()
        );
        Ok(added)
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        validate_collection_name(collection)?;
        let not_found = || IndexError::NotFound {
            collection: collection.to_string(),
        };

        let shared = self.existing(collection).await?.ok_or_else(not_found)?;
        let guard = shared.read().await;

        let Some(dimension) = guard.dimension.filter(|_| !guard.chunks.is_empty()) else {
            return Err(not_found());
        };
        if query.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }

        let mut results: Vec<SearchResult> = guard
            .chunks
            .iter()
            .map(|stored| SearchResult {
                chunk: RetrievedChunk {
                    id: stored.id.clone(),
                    text: stored.text.clone(),
                    metadata: stored.metadata.clone(),
                },
                similarity_score: cosine_similarity(query, &stored.embedding),
                seq: stored.seq,
            })
            .collect();

        rank_results(&mut results);
        results.truncate(k);

        debug!(
            "Search in {} returned {} results",
            collection,
            results.len()
        );
        Ok(results)
    }

    async fn count(&self, collection: &str) -> Result<usize, IndexError> {
        validate_collection_name(collection)?;
        match self.existing(collection).await? {
            Some(shared) => Ok(shared.read().await.chunks.len()),
            None => Ok(0),
        }
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool, IndexError> {
        validate_collection_name(collection)?;
        let removed_from_memory = self.collections.write().await.remove(collection).is_some();

        let mut removed_snapshot = false;
        if let Some(path) = self.snapshot_path(collection).filter(|p| p.exists()) {
            tokio::fs::remove_file(&path).await.map_err(|e| {
                IndexError::Storage(format!("Failed to remove {}: {}", path.display(), e))
            })?;
            removed_snapshot = true;
        }

        if removed_from_memory || removed_snapshot {
            info!("Deleted collection {}", collection);
        } else {
            warn!("Collection {} did not exist", collection);
        }
        Ok(removed_from_memory || removed_snapshot)
    }

    async fn list_collections(&self) -> Result<Vec<CollectionHandle>, IndexError> {
        let mut names: BTreeSet<String> = self.collections.read().await.keys().cloned().collect();
        names.extend(self.snapshot_names().await?);

        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            if let Some(shared) = self.existing(&name).await? {
                let guard = shared.read().await;
                handles.push(handle_for(&name, &guard));
            }
        }
        Ok(handles)
    }
}
