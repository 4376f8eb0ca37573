#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

/// Integration tests for the LanceDB index with realistic embedding sizes
mod common;

use common::{EchoModel, FAQ, KeywordEmbedder, write_text};
use ragdesk::chunking::ChunkMetadata;
use ragdesk::config::{Config, StorageBackend};
use ragdesk::database::lancedb::LanceIndex;
use ragdesk::database::open_vector_index;
use ragdesk::database::vector_store::{EmbeddedChunk, IndexError, VectorIndex};
use ragdesk::loader::DocumentSource;
use ragdesk::pipeline::{QueryRequest, RagService};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// embed-english-v3.0 dimensionality
const DIMENSION: usize = 1024;

fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.storage.backend = StorageBackend::Lancedb;
    (config, temp_dir)
}

fn realistic_vector(variation: f32) -> Vec<f32> {
    (0..DIMENSION)
        .map(|i| (i as f32).mul_add(0.01, variation).sin() * 0.1)
        .collect()
}

fn create_realistic_chunk(source: &str, text: &str, page: u32, variation: f32) -> EmbeddedChunk {
    EmbeddedChunk {
        id: Uuid::new_v4().to_string(),
        text: text.to_string(),
        metadata: ChunkMetadata {
            document_id: format!("doc-{source}"),
            source: source.to_string(),
            page,
            chunk_index: 0,
            start_offset: 0,
            end_offset: text.chars().count(),
        },
        embedding: realistic_vector(variation),
    }
}

fn create_handbook_dataset() -> Vec<EmbeddedChunk> {
    vec![
        create_realistic_chunk(
            "handbook.pdf",
            "Refunds are processed within 14 days of receiving the returned item.",
            3,
            0.1,
        ),
        create_realistic_chunk(
            "handbook.pdf",
            "Orders ship within two business days from our central warehouse.",
            4,
            1.3,
        ),
        create_realistic_chunk(
            "handbook.pdf",
            "The warranty covers manufacturing defects for a period of two years.",
            7,
            2.6,
        ),
        create_realistic_chunk(
            "support.txt",
            "Support is available on weekdays from 9am to 5pm by chat and email.",
            1,
            4.2,
        ),
    ]
}

#[tokio::test]
async fn configured_backend_stores_and_searches_realistic_vectors() {
    let (config, _temp_dir) = create_test_config();
    let index = open_vector_index(&config)
        .await
        .expect("should open configured index");
    assert_eq!(index.backend_name(), "lancedb");

    let dataset = create_handbook_dataset();
    let added = index
        .add("handbook", dataset.clone())
        .await
        .expect("should add chunks");
    assert_eq!(added, 4);

    let results = index
        .search("handbook", &realistic_vector(2.6), 2)
        .await
        .expect("should search");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.id, dataset[2].id);
    assert_eq!(results[0].chunk.metadata.page, 7);
    assert!((results[0].similarity_score - 1.0).abs() < 1e-3);
    assert!(results[0].similarity_score >= results[1].similarity_score);
}

#[tokio::test]
async fn collections_are_isolated_and_persisted() {
    let (config, _temp_dir) = create_test_config();
    let path = config.vector_database_path();

    {
        let index = LanceIndex::open(&path).await.expect("should open index");
        index
            .add("acme", create_handbook_dataset())
            .await
            .expect("should add acme");
        index
            .add(
                "globex",
                vec![create_realistic_chunk("globex.txt", "Globex ships by sea.", 1, 0.1)],
            )
            .await
            .expect("should add globex");
    }

    let index = LanceIndex::open(&path).await.expect("should reopen index");
    assert_eq!(index.count("acme").await.expect("should count"), 4);
    assert_eq!(index.count("globex").await.expect("should count"), 1);

    let results = index
        .search("globex", &realistic_vector(0.1), 4)
        .await
        .expect("should search globex");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.metadata.source, "globex.txt");

    let mut names: Vec<String> = index
        .list_collections()
        .await
        .expect("should list")
        .into_iter()
        .map(|handle| handle.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["acme".to_string(), "globex".to_string()]);
}

#[tokio::test]
async fn mismatched_batches_leave_the_table_unchanged() {
    let (config, _temp_dir) = create_test_config();
    let index = LanceIndex::open(&config.vector_database_path())
        .await
        .expect("should open index");
    index
        .add("acme", create_handbook_dataset())
        .await
        .expect("should add chunks");

    let mut short = create_realistic_chunk("bad.txt", "Too short", 1, 0.5);
    short.embedding.truncate(384);
    let result = index
        .add("acme", vec![create_realistic_chunk("ok.txt", "Fine", 1, 0.5), short])
        .await;

    assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    assert_eq!(index.count("acme").await.expect("should count"), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_searches_agree() {
    let (config, _temp_dir) = create_test_config();
    let index: Arc<dyn VectorIndex> = Arc::new(
        LanceIndex::open(&config.vector_database_path())
            .await
            .expect("should open index"),
    );
    let dataset = create_handbook_dataset();
    index
        .add("acme", dataset.clone())
        .await
        .expect("should add chunks");

    let searches = (0..8).map(|_| {
        let index = Arc::clone(&index);
        tokio::spawn(async move { index.search("acme", &realistic_vector(0.1), 1).await })
    });

    for handle in futures::future::join_all(searches).await {
        let results = handle
            .expect("search task should finish")
            .expect("should search");
        assert_eq!(results[0].chunk.id, dataset[0].id);
    }
}

#[tokio::test]
async fn service_answers_from_lancedb_and_deletes_collections() {
    let (config, temp_dir) = create_test_config();
    let index = open_vector_index(&config)
        .await
        .expect("should open configured index");
    let service = RagService::new(
        Arc::new(KeywordEmbedder),
        Arc::new(EchoModel::default()),
        Arc::clone(&index),
        &config,
    )
    .expect("should build service");

    for (name, content) in FAQ {
        let source = DocumentSource::Text(write_text(temp_dir.path(), name, content));
        service
            .ingest(&source, "acme")
            .await
            .expect("should ingest");
    }

    let response = service
        .query(QueryRequest::new("acme", "What is the refund policy?", "web-1"))
        .await;
    assert!(response.answer.is_some_and(|answer| answer.contains("14 days")));

    assert!(service
        .delete_collection("acme")
        .await
        .expect("should delete"));
    assert!(matches!(
        index.search("acme", &[0.1, 1.0, 0.0, 0.0, 0.0], 1).await,
        Err(IndexError::NotFound { .. })
    ));
}
