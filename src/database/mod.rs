// Storage layer: SQLite document registry plus a pluggable vector index

pub mod in_memory;
pub mod lancedb;
pub mod sqlite;
pub mod vector_store;

pub use sqlite::*;

use std::sync::Arc;
use tracing::info;

use self::in_memory::InMemoryIndex;
use self::lancedb::LanceIndex;
use self::vector_store::{IndexError, VectorIndex};
use crate::config::{Config, StorageBackend};

/// Open the vector index selected by `storage.backend`
#[inline]
pub async fn open_vector_index(config: &Config) -> Result<Arc<dyn VectorIndex>, IndexError> {
    let index: Arc<dyn VectorIndex> = match config.storage.backend {
        StorageBackend::Lancedb => Arc::new(LanceIndex::open(&config.vector_database_path()).await?),
        StorageBackend::Memory if config.storage.persist_snapshots => {
            Arc::new(InMemoryIndex::with_snapshots(config.snapshot_dir_path())?)
        }
        StorageBackend::Memory => Arc::new(InMemoryIndex::new()),
    };

    info!("Opened {} vector index", index.backend_name());
    Ok(index)
}
