#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// RagService::from_config against a mocked Cohere API

mod common;

use common::{FAQ, echo_first_passage, keyword_vector, write_text};
use ragdesk::RagError;
use ragdesk::config::settings::API_KEY_ENV;
use ragdesk::config::{Config, ConfigError, StorageBackend};
use ragdesk::loader::DocumentSource;
use ragdesk::pipeline::{QueryRequest, RagService};
use ragdesk::providers::ProviderError;
use serial_test::serial;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{any, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const API_KEY: &str = "test-key";

/// Embeds every requested text with the shared keyword scheme
struct EmbedResponder;

impl Respond for EmbedResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("embed body should be json");
        let embeddings: Vec<Vec<f32>> = body["texts"]
            .as_array()
            .expect("texts should be an array")
            .iter()
            .map(|text| keyword_vector(text.as_str().unwrap_or_default()))
            .collect();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "embed-1",
            "embeddings": embeddings,
        }))
    }
}

/// Rephrases questions and answers with the top passage
struct ChatResponder;

impl Respond for ChatResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("chat body should be json");
        let message = body["message"].as_str().unwrap_or_default();
        let text = if message.contains("Context: ") {
            echo_first_passage(message)
        } else {
            "How long do refunds take?\nRefund timeline".to_string()
        };
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response_id": "chat-1",
            "text": text,
        }))
    }
}

fn test_config(dir: &Path, base_url: &str, api_key: Option<&str>) -> Config {
    let mut config = Config {
        base_dir: dir.to_path_buf(),
        ..Config::default()
    };
    config.provider.base_url = base_url.to_string();
    config.provider.api_key = api_key.map(str::to_string);
    config.storage.backend = StorageBackend::Memory;
    config.storage.persist_snapshots = false;
    config
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn missing_api_key_fails_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    // SAFETY: serialised with every other test touching the process environment
    unsafe { std::env::remove_var(API_KEY_ENV) };

    let temp_dir = TempDir::new().expect("should create temp dir");
    let result = RagService::from_config(&test_config(temp_dir.path(), &server.uri(), None)).await;

    assert!(matches!(
        result,
        Err(RagError::Config(ConfigError::MissingApiKey))
    ));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn documents_are_embedded_and_questions_answered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embed"))
        .and(header("Authorization", format!("Bearer {API_KEY}").as_str()))
        .and(body_partial_json(serde_json::json!({ "input_type": "search_document" })))
        .respond_with(EmbedResponder)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embed"))
        .and(body_partial_json(serde_json::json!({ "input_type": "search_query" })))
        .respond_with(EmbedResponder)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat"))
        .respond_with(ChatResponder)
        .expect(2)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(temp_dir.path(), &server.uri(), Some(API_KEY));
    let service = RagService::from_config(&config)
        .await
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

    assert!(!response.error);
    assert!(response.answer.is_some_and(|answer| answer.contains("14 days")));

    let registry = service.registry().expect("from_config opens the registry");
    let documents = registry
        .list_documents(Some("acme"))
        .await
        .expect("should list documents");
    assert_eq!(documents.len(), 3);
    assert!(documents.iter().all(|d| d.is_completed()));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn rejected_key_fails_ingestion_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embed"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(serde_json::json!({ "message": "invalid api token" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = test_config(temp_dir.path(), &server.uri(), Some("wrong-key"));
    let service = RagService::from_config(&config)
        .await
        .expect("should build service");

    let source = DocumentSource::Text(write_text(temp_dir.path(), FAQ[0].0, FAQ[0].1));
    let result = service.ingest(&source, "acme").await;
    assert!(matches!(
        result,
        Err(RagError::Provider(ProviderError::Auth(401)))
    ));

    let documents = service
        .registry()
        .expect("from_config opens the registry")
        .list_documents(Some("acme"))
        .await
        .expect("should list documents");
    assert_eq!(documents.len(), 1);
    assert!(documents[0].is_failed());
    assert_eq!(service.index().count("acme").await.unwrap_or(0), 0);
}
