use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{
    CollectionSummary, DocumentRecord, DocumentUpdate, NewDocument,
};
use crate::database::sqlite::queries::DocumentQueries;


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// Registry of ingested documents, kept beside the vector store
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join("metadata.db")).await
    }

    #[inline]
    pub async fn register_document(&self, document: &NewDocument) -> Result<DocumentRecord> {
        DocumentQueries::create(&self.pool, document.clone()).await
    }

    #[inline]
    pub async fn update_document(
        &self,
        id: i64,
        update: &DocumentUpdate,
    ) -> Result<Option<DocumentRecord>> {
        DocumentQueries::update(&self.pool, id, update.clone()).await
    }

    #[inline]
    pub async fn get_document(&self, id: i64) -> Result<Option<DocumentRecord>> {
        DocumentQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn list_documents(&self, collection: Option<&str>) -> Result<Vec<DocumentRecord>> {
        match collection {
            Some(name) => DocumentQueries::list_by_collection(&self.pool, name).await,
            None => DocumentQueries::list_all(&self.pool).await,
        }
    }

    #[inline]
    pub async fn forget_collection(&self, collection: &str) -> Result<u64> {
        DocumentQueries::delete_by_collection(&self.pool, collection).await
    }

    #[inline]
    pub async fn collection_summaries(&self) -> Result<Vec<CollectionSummary>> {
        DocumentQueries::collection_summaries(&self.pool).await
    }
}
