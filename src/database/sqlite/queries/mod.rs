
use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

const DOCUMENT_COLUMNS: &str = "id, collection, source, source_kind, document_uid, status, \
     page_count, chunk_count, error_message, created_date, indexed_date";

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_document: NewDocument) -> Result<DocumentRecord> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO documents (collection, source, source_kind, status, created_date) \
             VALUES (?, ?, ?, 'pending', ?)",
        )
        .bind(&new_document.collection)
        .bind(&new_document.source)
        .bind(&new_document.source_kind)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create document")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created document"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<DocumentRecord>> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?");
        let result = sqlx::query_as::<_, DocumentRecord>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get document by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<DocumentRecord>> {
        let query =
            format!("SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY collection, created_date, id");
        let documents = sqlx::query_as::<_, DocumentRecord>(&query)
            .fetch_all(pool)
            .await
            .context("Failed to list documents")?;

        Ok(documents)
    }

    #[inline]
    pub async fn list_by_collection(
        pool: &SqlitePool,
        collection: &str,
    ) -> Result<Vec<DocumentRecord>> {
        let query = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE collection = ? ORDER BY created_date, id"
        );
        let documents = sqlx::query_as::<_, DocumentRecord>(&query)
            .bind(collection)
            .fetch_all(pool)
            .await
            .context("Failed to list documents for collection")?;

        Ok(documents)
    }

    #[inline]
    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        update: DocumentUpdate,
    ) -> Result<Option<DocumentRecord>> {
        let mut query_parts = Vec::new();
        let mut query_values = Vec::new();

        if let Some(status) = update.status {
            query_parts.push("status = ?");
            query_values.push(status.as_str().to_string());
        }

        if let Some(document_uid) = update.document_uid {
            query_parts.push("document_uid = ?");
            query_values.push(document_uid);
        }

        if let Some(pages) = update.page_count {
            query_parts.push("page_count = ?");
            query_values.push(pages.to_string());
        }

        if let Some(chunks) = update.chunk_count {
            query_parts.push("chunk_count = ?");
            query_values.push(chunks.to_string());
        }

        if let Some(error) = update.error_message {
            query_parts.push("error_message = ?");
            query_values.push(error);
        }

        if let Some(indexed_date) = update.indexed_date {
            query_parts.push("indexed_date = ?");
            query_values.push(indexed_date.to_string());
        }

        if query_parts.is_empty() {
            return Self::get_by_id(pool, id).await;
        }

        let query_str = format!(
            "UPDATE documents SET {} WHERE id = ?",
            query_parts.join(", ")
        );

        let mut query = sqlx::query(&query_str);
        for value in query_values {
            query = query.bind(value);
        }
        query = query.bind(id);

        query
            .execute(pool)
            .await
            .context("Failed to update document")?;

        Self::get_by_id(pool, id).await
    }

    /// Remove every registry row for a collection, returning how many were deleted
    #[inline]
    pub async fn delete_by_collection(pool: &SqlitePool, collection: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(collection)
            .execute(pool)
            .await
            .context("Failed to delete documents for collection")?;

        debug!(
            "Deleted {} registry rows for collection {}",
            result.rows_affected(),
            collection
        );
        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn collection_summaries(pool: &SqlitePool) -> Result<Vec<CollectionSummary>> {
        let summaries = sqlx::query_as::<_, CollectionSummary>(
            r#"
            SELECT collection,
                   COUNT(*) AS documents,
                   COALESCE(SUM(chunk_count), 0) AS chunks,
                   MAX(indexed_date) AS last_indexed
            FROM documents
            WHERE status = 'completed'
            GROUP BY collection
            ORDER BY collection
            "#,
        )
        .fetch_all(pool)
        .await
        .context("Failed to summarize collections")?;

        Ok(summaries)
    }
}
