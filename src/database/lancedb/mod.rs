// LanceDB vector index
// One table per collection, cosine distance, persisted under the vectors directory


use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::vector_store::{
    CollectionHandle, EmbeddedChunk, IndexError, RetrievedChunk, SearchResult, VectorIndex,
    batch_dimension, rank_results, validate_collection_name,
};
use crate::chunking::ChunkMetadata;

const TABLE_PREFIX: &str = "kb_";

/// Extra candidates fetched up front; the window doubles while the cut-off is still tied
const TIE_MARGIN: usize = 8;

/// Persistent vector index backed by LanceDB
pub struct LanceIndex {
    connection: Connection,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

fn storage_error(context: &str) -> impl Fn(lancedb::Error) -> IndexError + '_ {
    move |e| IndexError::Storage(format!("{context}: {e}"))
}

fn table_name(collection: &str) -> String {
    format!("{TABLE_PREFIX}{collection}")
}

fn create_schema(vector_dim: usize) -> Result<Arc<Schema>, IndexError> {
    let list_size = i32::try_from(vector_dim)
        .map_err(|_| IndexError::Storage(format!("Vector dimension {vector_dim} too large")))?;

    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                list_size,
            ),
            false,
        ),
        Field::new("seq", DataType::UInt64, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("page", DataType::UInt32, false),
        Field::new("chunk_index", DataType::UInt64, false),
        Field::new("start_offset", DataType::UInt64, false),
        Field::new("end_offset", DataType::UInt64, false),
    ])))
}

fn as_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn as_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

impl LanceIndex {
    /// Open (or create) the LanceDB directory at `db_path`
    #[inline]
    pub async fn open(db_path: &Path) -> Result<Self, IndexError> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            IndexError::Storage(format!("Failed to create vector database directory: {e}"))
        })?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(storage_error("Failed to connect to LanceDB"))?;

        info!("Vector index opened at {}", db_path.display());
        Ok(Self {
            connection,
            write_locks: Mutex::default(),
        })
    }

    async fn write_lock(&self, collection: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        Arc::clone(locks.entry(collection.to_string()).or_default())
    }

    async fn open_table(&self, collection: &str) -> Result<Option<Table>, IndexError> {
        let name = table_name(collection);
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(storage_error("Failed to list tables"))?;

        if !table_names.contains(&name) {
            return Ok(None);
        }

        let table = self
            .connection
            .open_table(&name)
            .execute()
            .await
            .map_err(storage_error("Failed to open table"))?;
        Ok(Some(table))
    }

    async fn handle_for(&self, collection: &str) -> Result<CollectionHandle, IndexError> {
        let Some(table) = self.open_table(collection).await? else {
            return Ok(CollectionHandle {
                name: collection.to_string(),
                dimension: None,
                len: 0,
            });
        };

        let dimension = table_dimension(&table).await?;
        let len = table
            .count_rows(None)
            .await
            .map_err(storage_error("Failed to count rows"))?;

        Ok(CollectionHandle {
            name: collection.to_string(),
            dimension: Some(dimension),
            len,
        })
    }
}

/// Detect vector dimension from the table schema
async fn table_dimension(table: &Table) -> Result<usize, IndexError> {
    let schema = table
        .schema()
        .await
        .map_err(storage_error("Failed to get table schema"))?;

    schema
        .fields()
        .iter()
        .find(|field| field.name() == "vector")
        .and_then(|field| match field.data_type() {
            DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
            _ => None,
        })
        .ok_or_else(|| {
            IndexError::Storage("Could not find vector column or determine dimension".to_string())
        })
}

/// Create a RecordBatch from embedded chunks, numbering them from `first_seq`
fn create_record_batch(
    chunks: &[EmbeddedChunk],
    vector_dim: usize,
    first_seq: u64,
) -> Result<RecordBatch, IndexError> {
    let schema = create_schema(vector_dim)?;
    let list_size = i32::try_from(vector_dim)
        .map_err(|_| IndexError::Storage(format!("Vector dimension {vector_dim} too large")))?;

    let mut flat_values = Vec::with_capacity(chunks.len() * vector_dim);
    for chunk in chunks {
        flat_values.extend_from_slice(&chunk.embedding);
    }
    let values_array = Float32Array::from(flat_values);
    let field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array = FixedSizeListArray::try_new(field, list_size, Arc::new(values_array), None)
        .map_err(|e| IndexError::Storage(format!("Failed to create vector array: {e}")))?;

    let seqs: Vec<u64> = (first_seq..).take(chunks.len()).collect();

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.id.as_str()))),
        Arc::new(vector_array),
        Arc::new(UInt64Array::from(seqs)),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.text.as_str()))),
        Arc::new(StringArray::from_iter_values(
            chunks.iter().map(|c| c.metadata.document_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            chunks.iter().map(|c| c.metadata.source.as_str()),
        )),
        Arc::new(UInt32Array::from_iter_values(
            chunks.iter().map(|c| c.metadata.page),
        )),
        Arc::new(UInt64Array::from_iter_values(
            chunks.iter().map(|c| as_u64(c.metadata.chunk_index)),
        )),
        Arc::new(UInt64Array::from_iter_values(
            chunks.iter().map(|c| as_u64(c.metadata.start_offset)),
        )),
        Arc::new(UInt64Array::from_iter_values(
            chunks.iter().map(|c| as_u64(c.metadata.end_offset)),
        )),
    ];

    RecordBatch::try_new(schema, arrays)
        .map_err(|e| IndexError::Storage(format!("Failed to create record batch: {e}")))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, IndexError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| IndexError::Storage(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| IndexError::Storage(format!("Invalid {name} column type")))
}

fn u64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt64Array, IndexError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| IndexError::Storage(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| IndexError::Storage(format!("Invalid {name} column type")))
}

/// Parse a single record batch from search results
/// Nearest `limit` rows by cosine distance, in whatever order LanceDB yields them
async fn fetch_candidates(
    table: &Table,
    query: &[f32],
    limit: usize,
) -> Result<Vec<SearchResult>, IndexError> {
    let mut stream = table
        .vector_search(query)
        .map_err(storage_error("Failed to create vector search"))?
        .column("vector")
        .distance_type(DistanceType::Cosine)
        .limit(limit)
        .execute()
        .await
        .map_err(storage_error("Failed to execute search"))?;

    let mut results = Vec::new();
    while let Some(batch) = stream
        .try_next()
        .await
        .map_err(storage_error("Failed to read result stream"))?
    {
        results.extend(parse_search_batch(&batch)?);
    }
    Ok(results)
}

/// Whether the weakest ranked candidate scores the same as the k-th one, so rows
/// outside the fetched window could still tie for a place in the top `k`
fn tied_at_cutoff(ranked: &[SearchResult], k: usize) -> bool {
    match (k.checked_sub(1).and_then(|i| ranked.get(i)), ranked.last()) {
        (Some(kth), Some(last)) => kth
            .similarity_score
            .total_cmp(&last.similarity_score)
            .is_eq(),
        _ => false,
    }
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>, IndexError> {
    let ids = string_column(batch, "id")?;
    let texts = string_column(batch, "text")?;
    let document_ids = string_column(batch, "document_id")?;
    let sources = string_column(batch, "source")?;
    let seqs = u64_column(batch, "seq")?;
    let chunk_indices = u64_column(batch, "chunk_index")?;
    let start_offsets = u64_column(batch, "start_offset")?;
    let end_offsets = u64_column(batch, "end_offset")?;
    let pages = batch
        .column_by_name("page")
        .ok_or_else(|| IndexError::Storage("Missing page column".to_string()))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| IndexError::Storage("Invalid page column type".to_string()))?;

    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let results = (0..batch.num_rows())
        .map(|row| {
            let distance =
                distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            SearchResult {
                chunk: RetrievedChunk {
                    id: ids.value(row).to_string(),
                    text: texts.value(row).to_string(),
                    metadata: ChunkMetadata {
                        document_id: document_ids.value(row).to_string(),
                        source: sources.value(row).to_string(),
                        page: pages.value(row),
                        chunk_index: as_usize(chunk_indices.value(row)),
                        start_offset: as_usize(start_offsets.value(row)),
                        end_offset: as_usize(end_offsets.value(row)),
                    },
                },
                // Cosine distance is 1 - cosine similarity
                similarity_score: 1.0 - distance,
                seq: seqs.value(row),
            }
        })
        .collect();

    Ok(results)
}

#[async_trait]
impl VectorIndex for LanceIndex {
    fn backend_name(&self) -> &'static str {
        "lancedb"
    }

    async fn create_or_get(&self, collection: &str) -> Result<CollectionHandle, IndexError> {
        validate_collection_name(collection)?;
        // The table itself is created by the first insert, once the dimension is known
        self.handle_for(collection).await
    }

    async fn add(
        &self,
        collection: &str,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<usize, IndexError> {
        validate_collection_name(collection)?;
        let lock = self.write_lock(collection).await;
        let _guard = lock.lock().await;

        let existing = self.open_table(collection).await?;
        let established = match existing.as_ref() {
            Some(table) => Some(table_dimension(table).await?),
            None => None,
        };

        let Some(vector_dim) = batch_dimension(&chunks, established)? else {
            return Ok(0);
        };
        if chunks.is_empty() {
            return Ok(0);
        }

        let first_seq = match existing.as_ref() {
            Some(table) => as_u64(
                table
                    .count_rows(None)
                    .await
                    .map_err(storage_error("Failed to count rows"))?,
            ),
            None => 0,
        };

        let record_batch = create_record_batch(&chunks, vector_dim, first_seq)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        if let Some(table) = existing {
            table
                .add(reader)
                .execute()
                .await
                .map_err(storage_error("Failed to insert embeddings"))?;
        } else {
            self.connection
                .create_table(table_name(collection), reader)
                .execute()
                .await
                .map_err(storage_error("Failed to create table"))?;
        }

        info!(
            "Stored {} embeddings in collection {}",
            chunks.len(),
            collection
        );
        Ok(chunks.len())
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

        let table = self.open_table(collection).await?.ok_or_else(not_found)?;
        let rows = table
            .count_rows(None)
            .await
            .map_err(storage_error("Failed to count rows"))?;
        if rows == 0 {
            return Err(not_found());
        }

        let dimension = table_dimension(&table).await?;
        if query.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut limit = k.saturating_add(TIE_MARGIN).min(rows);
        let mut results = loop {
            let mut candidates = fetch_candidates(&table, query, limit).await?;
            rank_results(&mut candidates);
            if limit >= rows || !tied_at_cutoff(&candidates, k) {
                break candidates;
            }
            debug!(
                "Candidates tie at the cut-off in {}, widening search past {}",
                collection, limit
            );
            limit = limit.saturating_mul(2).min(rows);
        };
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
        Ok(self.handle_for(collection).await?.len)
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool, IndexError> {
        validate_collection_name(collection)?;
        let lock = self.write_lock(collection).await;
        let _guard = lock.lock().await;

        if self.open_table(collection).await?.is_none() {
            return Ok(false);
        }

        self.connection
            .drop_table(&table_name(collection))
            .await
            .map_err(storage_error("Failed to drop table"))?;

        info!("Deleted collection {}", collection);
        Ok(true)
    }

    async fn list_collections(&self) -> Result<Vec<CollectionHandle>, IndexError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(storage_error("Failed to list tables"))?;

        let mut handles = Vec::new();
        for name in table_names {
            let Some(collection) = name.strip_prefix(TABLE_PREFIX) else {
                continue;
            };
            handles.push(self.handle_for(collection).await?);
        }
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(handles)
    }
}
