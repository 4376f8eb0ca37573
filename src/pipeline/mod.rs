// RAG service
// Wires loading, chunking, embedding and indexing for ingestion, and retrieval plus
// synthesis for answering. `query` is the one place where errors become user text.


use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::chunking::{ChunkingConfig, chunk_document};
use crate::config::Config;
use crate::database::Database;
use crate::database::open_vector_index;
use crate::database::sqlite::models::{DocumentStatus, DocumentUpdate, NewDocument};
use crate::database::vector_store::{
    CollectionHandle, EmbeddedChunk, VectorIndex, validate_collection_name,
};
use crate::loader::{DocumentSource, LoadError, LoadedDocument, load_document};
use crate::memory::SessionStore;
use crate::providers::{CohereClient, EmbeddingProvider, InputKind, LanguageModel, ProviderError};
use crate::retrieval::MultiQueryRetriever;
use crate::synthesis::{Answer, AnswerSynthesizer, Citation, FALLBACK_ANSWER, PromptTemplate};
use crate::{RagError, Result};

/// Outcome of a successful ingest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub collection: String,
    pub document_id: String,
    pub source: String,
    pub pages: usize,
    pub chunks_indexed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub collection: String,
    pub question: String,
    pub session_id: String,
}

impl QueryRequest {
    #[inline]
    pub fn new(
        collection: impl Into<String>,
        question: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            question: question.into(),
            session_id: session_id.into(),
        }
    }
}

/// What the query boundary hands back to callers.
///
/// `answer` is `None` when the model produced nothing; on failure it carries
/// [`FALLBACK_ANSWER`] and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: Option<String>,
    pub citations: Vec<Citation>,
    pub error: bool,
}

impl QueryResponse {
    #[inline]
    pub fn failed() -> Self {
        Self {
            answer: Some(FALLBACK_ANSWER.to_string()),
            citations: Vec::new(),
            error: true,
        }
    }
}

impl From<Answer> for QueryResponse {
    #[inline]
    fn from(answer: Answer) -> Self {
        let text = (!answer.is_blank()).then_some(answer.text);
        Self {
            answer: text,
            citations: answer.citations,
            error: false,
        }
    }
}

pub struct RagService {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    registry: Option<Database>,
    retriever: MultiQueryRetriever,
    synthesizer: AnswerSynthesizer,
    sessions: SessionStore,
    chunking: ChunkingConfig,
    answer_timeout: Duration,
}

impl RagService {
    /// Assemble a service from already constructed clients
    #[inline]
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
        index: Arc<dyn VectorIndex>,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;
        let template = PromptTemplate::new(&config.prompt.template)?;

        Ok(Self {
            retriever: MultiQueryRetriever::new(
                Arc::clone(&embedder),
                Arc::clone(&model),
                Arc::clone(&index),
                config.retrieval,
            ),
            synthesizer: AnswerSynthesizer::new(model, template),
            sessions: SessionStore::new(&config.memory),
            embedder,
            index,
            registry: None,
            chunking: config.chunking,
            answer_timeout: config.answer_timeout(),
        })
    }

    /// Build the Cohere client, the configured index backend and the document registry.
    ///
    /// Fails before any network traffic when no API key is available.
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let client = Arc::new(CohereClient::new(&config.provider)?);
        let index = open_vector_index(config).await?;
        let registry = Database::initialize_from_config_dir(config.get_base_dir())
            .await
            .map_err(|e| RagError::Database(format!("{e:#}")))?;

        info!(
            "RAG service ready (chat model {}, embedding model {}, index {})",
            config.provider.chat_model,
            config.provider.embedding_model,
            index.backend_name()
        );

        Ok(Self::new(
            Arc::clone(&client) as Arc<dyn EmbeddingProvider>,
            client,
            index,
            config,
        )?
        .with_registry(registry))
    }

    #[inline]
    pub fn with_registry(mut self, registry: Database) -> Self {
        self.registry = Some(registry);
        self
    }

    #[inline]
    pub fn with_answer_timeout(mut self, timeout: Duration) -> Self {
        self.answer_timeout = timeout;
        self
    }

    #[inline]
    pub fn registry(&self) -> Option<&Database> {
        self.registry.as_ref()
    }

    #[inline]
    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Load, chunk, embed and index one document into `collection`.
    ///
    /// Either every chunk of the document lands in the index or none does.
    #[inline]
    pub async fn ingest(&self, source: &DocumentSource, collection: &str) -> Result<IngestReport> {
        validate_collection_name(collection)?;

        let record_id = match &self.registry {
            Some(registry) => {
                let record = registry
                    .register_document(&NewDocument {
                        collection: collection.to_string(),
                        source: source.describe(),
                        source_kind: source.kind().as_str().to_string(),
                    })
                    .await
                    .map_err(|e| RagError::Database(format!("{e:#}")))?;
                Some(record.id)
            }
            None => None,
        };

        self.mark(
            record_id,
            DocumentUpdate {
                status: Some(DocumentStatus::Indexing),
                ..DocumentUpdate::default()
            },
        )
        .await;

        match self.ingest_document(source, collection).await {
            Ok(report) => {
                self.mark(
                    record_id,
                    DocumentUpdate {
                        status: Some(DocumentStatus::Completed),
                        document_uid: Some(report.document_id.clone()),
                        page_count: i64::try_from(report.pages).ok(),
                        chunk_count: i64::try_from(report.chunks_indexed).ok(),
                        indexed_date: Some(Utc::now().naive_utc()),
                        ..DocumentUpdate::default()
                    },
                )
                .await;
                Ok(report)
            }
            Err(e) => {
                warn!("Ingestion of {} failed: {}", source.describe(), e);
                self.mark(
                    record_id,
                    DocumentUpdate {
                        status: Some(DocumentStatus::Failed),
                        error_message: Some(e.to_string()),
                        ..DocumentUpdate::default()
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    async fn ingest_document(
        &self,
        source: &DocumentSource,
        collection: &str,
    ) -> Result<IngestReport> {
        let document = load_off_runtime(source.clone()).await?;
        info!(
            "Loaded {} pages from {}",
            document.page_count(),
            document.source
        );

        let chunks = chunk_document(&document, &self.chunking);
        if chunks.is_empty() {
            return Err(LoadError::Empty(document.source).into());
        }
        debug!("Split {} into {} chunks", document.source, chunks.len());

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts, InputKind::Document).await?;
        if embeddings.len() != chunks.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            ))
            .into());
        }

        let embedded: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| EmbeddedChunk::new(chunk, embedding))
            .collect();

        let chunks_indexed = self.index.add(collection, embedded).await?;
        info!(
            "Indexed {} chunks from {} into {}",
            chunks_indexed, document.source, collection
        );

        Ok(IngestReport {
            collection: collection.to_string(),
            pages: document.page_count(),
            document_id: document.document_id,
            source: document.source,
            chunks_indexed,
        })
    }

    async fn mark(&self, record_id: Option<i64>, update: DocumentUpdate) {
        let (Some(registry), Some(id)) = (&self.registry, record_id) else {
            return;
        };
        if let Err(e) = registry.update_document(id, &update).await {
            warn!("Failed to update registry entry {}: {:#}", id, e);
        }
    }

    /// Retrieve and synthesise an answer, returning typed errors
    #[inline]
    pub async fn answer(&self, request: &QueryRequest) -> Result<Answer> {
        let memory = self.sessions.session(&request.session_id).await;
        let mut memory = memory.lock().await;

        let passages = self
            .retriever
            .retrieve(&request.collection, &request.question)
            .await?;
        debug!(
            "Answering in {} with {} passages",
            request.collection,
            passages.len()
        );

        let answer = self
            .synthesizer
            .synthesize(&request.question, &passages, &mut memory)
            .await?;
        Ok(answer)
    }

    /// The query boundary: never fails, never leaks internal error text
    #[inline]
    pub async fn query(&self, request: QueryRequest) -> QueryResponse {
        match tokio::time::timeout(self.answer_timeout, self.answer(&request)).await {
            Ok(Ok(answer)) => QueryResponse::from(answer),
            Ok(Err(e)) => {
                error!(
                    "Failed to answer question in collection {} for session {}: {:?}",
                    request.collection, request.session_id, e
                );
                QueryResponse::failed()
            }
            Err(_) => {
                error!(
                    "Answering in collection {} for session {} timed out after {:?}",
                    request.collection, request.session_id, self.answer_timeout
                );
                QueryResponse::failed()
            }
        }
    }

    #[inline]
    pub async fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.clear_session(session_id).await
    }

    #[inline]
    pub async fn list_collections(&self) -> Result<Vec<CollectionHandle>> {
        Ok(self.index.list_collections().await?)
    }

    /// Drop a collection's vectors and its registry rows
    #[inline]
    pub async fn delete_collection(&self, collection: &str) -> Result<bool> {
        let removed = self.index.delete_collection(collection).await?;
        if let Some(registry) = &self.registry {
            registry
                .forget_collection(collection)
                .await
                .map_err(|e| RagError::Database(format!("{e:#}")))?;
        }
        Ok(removed)
    }
}

/// PDF parsing and URL fetching block, so they run on the blocking pool
async fn load_off_runtime(source: DocumentSource) -> Result<LoadedDocument> {
    let document = tokio::task::spawn_blocking(move || load_document(&source))
        .await
        .map_err(|e| RagError::Other(anyhow::anyhow!("Document loader task failed: {e}")))??;
    Ok(document)
}
