use super::*;
use crate::RagError;
use crate::chunking::{ChunkMetadata, TextChunk};
use crate::database::in_memory::InMemoryIndex;
use crate::database::vector_store::{EmbeddedChunk, RetrievedChunk};
use async_trait::async_trait;
use std::sync::Mutex;

/// Looks texts up in a fixed table, falling back to a default vector
struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl TableEmbedder {
    fn new(entries: &[(&str, [f32; 3])]) -> Arc<Self> {
        Arc::new(Self {
            table: entries
                .iter()
                .map(|(text, v)| ((*text).to_string(), v.to_vec()))
                .collect(),
            fallback: vec![0.0, 0.0, 1.0],
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    fn name(&self) -> &str {
        "table"
    }

    async fn embed(
        &self,
        texts: &[String],
        _kind: InputKind,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.lock().expect("calls lock").push(texts.to_vec());
        Ok(texts
            .iter()
            .map(|t| self.table.get(t).cloned().unwrap_or_else(|| self.fallback.clone()))
            .collect())
    }
}

struct ScriptedModel {
    reply: Result<String, ()>,
    calls: Mutex<usize>,
}

impl ScriptedModel {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            calls: Mutex::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: Err(()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().expect("calls lock")
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
        *self.calls.lock().expect("calls lock") += 1;
        self.reply
            .clone()
            .map_err(|()| ProviderError::Transient("connection reset".to_string()))
    }
}

fn embedded(text: &str, embedding: [f32; 3]) -> EmbeddedChunk {
    EmbeddedChunk::new(
        TextChunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                document_id: "doc".to_string(),
                source: "faq.txt".to_string(),
                page: 1,
                chunk_index: 0,
                start_offset: 0,
                end_offset: text.chars().count(),
            },
        },
        embedding.to_vec(),
    )
}

async fn populated_index() -> Arc<InMemoryIndex> {
    let index = Arc::new(InMemoryIndex::new());
    index
        .add(
            "kb",
            vec![
                embedded("Refunds are processed within 14 days", [1.0, 0.0, 0.0]),
                embedded("Returns need the original receipt", [0.8, 0.6, 0.0]),
                embedded("Shipping is free over $50", [0.0, 1.0, 0.0]),
                embedded("Support is open on weekdays", [0.0, 0.0, 1.0]),
            ],
        )
        .await
        .expect("should add chunks");
    index
}

fn search_result(id: &str, seq: u64, score: f32) -> SearchResult {
    SearchResult {
        chunk: RetrievedChunk {
            id: id.to_string(),
            text: id.to_string(),
            metadata: ChunkMetadata {
                document_id: "doc".to_string(),
                source: "faq.txt".to_string(),
                page: 1,
                chunk_index: 0,
                start_offset: 0,
                end_offset: 1,
            },
        },
        similarity_score: score,
        seq,
    }
}

fn ids(results: &[SearchResult]) -> Vec<&str> {
    results.iter().map(|r| r.chunk.id.as_str()).collect()
}

#[test]
fn config_defaults_and_bounds() {
    let config = RetrievalConfig::default();
    assert_eq!(config.top_k, 4);
    assert_eq!(config.query_variants, 3);
    assert_eq!(config.max_results, 8);
    assert!(config.validate().is_ok());

    let zero_k = RetrievalConfig {
        top_k: 0,
        ..config
    };
    assert!(matches!(zero_k.validate(), Err(ConfigError::InvalidTopK(0))));

    let too_many = RetrievalConfig {
        query_variants: 11,
        ..config
    };
    assert!(matches!(
        too_many.validate(),
        Err(ConfigError::InvalidQueryVariants(11))
    ));

    let small_cap = RetrievalConfig {
        max_results: 3,
        ..config
    };
    assert!(matches!(
        small_cap.validate(),
        Err(ConfigError::InvalidMaxResults {
            max_results: 3,
            top_k: 4
        })
    ));
}

#[test]
fn variants_are_cleaned_and_deduplicated() {
    let reply = "1. How long do refunds take?\n\
                 2) When will I get my money back?\n\
                 - how long do refunds take?\n\
                 \n\
                 * \"What is the refund policy?\"\n\
                 • What is the return window?";

    let variants = parse_variants(reply, "What is the refund policy?", 5);
    assert_eq!(
        variants,
        vec![
            "How long do refunds take?".to_string(),
            "When will I get my money back?".to_string(),
            "What is the return window?".to_string(),
        ]
    );

    assert_eq!(parse_variants(reply, "unrelated", 1).len(), 1);
    assert!(parse_variants("   \n\n", "q", 3).is_empty());
}

#[test]
fn list_markers_do_not_eat_leading_numbers() {
    assert_eq!(strip_list_marker("3. Is it free?"), "Is it free?");
    assert_eq!(strip_list_marker("24 hour support?"), "24 hour support?");
    assert_eq!(strip_list_marker("- item"), "item");
}

#[test]
fn merge_keeps_primary_hits_and_best_scores() {
    let primary = vec![search_result("a", 0, 0.9), search_result("b", 1, 0.2)];
    let expanded = vec![
        vec![search_result("c", 2, 0.8), search_result("b", 1, 0.7)],
        vec![search_result("d", 3, 0.6), search_result("e", 4, 0.5)],
    ];

    let merged = merge_results(primary, expanded, 3);
    assert_eq!(ids(&merged), vec!["a", "c", "b"]);
    assert!((merged[2].similarity_score - 0.7).abs() < f32::EPSILON);
}

#[test]
fn merge_never_drops_primary_hits_for_the_cap() {
    let primary = vec![search_result("a", 0, 0.1), search_result("b", 1, 0.1)];
    let expanded = vec![vec![search_result("c", 2, 0.99)]];

    let merged = merge_results(primary, expanded, 2);
    assert_eq!(ids(&merged), vec!["a", "b"]);
}

#[tokio::test]
async fn expansion_returns_superset_of_single_query() {
    let index = populated_index().await;
    let embedder = TableEmbedder::new(&[
        ("What is the refund policy?", [1.0, 0.0, 0.0]),
        ("Can I return an item?", [0.8, 0.6, 0.0]),
        ("Do you ship for free?", [0.0, 1.0, 0.0]),
    ]);
    let model = ScriptedModel::replying("1. Can I return an item?\n2. Do you ship for free?");
    let config = RetrievalConfig {
        top_k: 1,
        query_variants: 2,
        max_results: 4,
    };
    let retriever = MultiQueryRetriever::new(
        Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>,
        Arc::clone(&model) as Arc<dyn LanguageModel>,
        index,
        config,
    );

    let single = retriever
        .retrieve_single("kb", "What is the refund policy?")
        .await
        .expect("single retrieval");
    let multi = retriever
        .retrieve("kb", "What is the refund policy?")
        .await
        .expect("multi retrieval");

    let multi_ids: HashSet<&str> = ids(&multi).into_iter().collect();
    for id in ids(&single) {
        assert!(multi_ids.contains(id));
    }
    assert_eq!(multi.len(), 3);
    assert_eq!(multi[0].chunk.text, "Refunds are processed within 14 days");
    assert_eq!(model.calls(), 1);

    let calls = embedder.calls();
    assert_eq!(calls.last().map(Vec::len), Some(3));
}

#[tokio::test]
async fn failed_expansion_falls_back_to_single_query() {
    let index = populated_index().await;
    let embedder = TableEmbedder::new(&[("refunds?", [1.0, 0.0, 0.0])]);
    let retriever = MultiQueryRetriever::new(
        embedder,
        ScriptedModel::failing(),
        index,
        RetrievalConfig::default(),
    );

    let fallback = retriever.retrieve("kb", "refunds?").await.expect("fallback retrieval");
    let single = retriever.retrieve_single("kb", "refunds?").await.expect("single retrieval");
    assert_eq!(ids(&fallback), ids(&single));
}

#[tokio::test]
async fn unusable_expansion_falls_back_to_single_query() {
    let index = populated_index().await;
    let embedder = TableEmbedder::new(&[("refunds?", [1.0, 0.0, 0.0])]);
    let retriever = MultiQueryRetriever::new(
        Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>,
        ScriptedModel::replying("refunds?\n\n"),
        index,
        RetrievalConfig::default(),
    );

    retriever.retrieve("kb", "refunds?").await.expect("fallback retrieval");
    assert_eq!(embedder.calls(), vec![vec!["refunds?".to_string()]]);
}

#[tokio::test]
async fn zero_variants_skips_the_model() {
    let index = populated_index().await;
    let model = ScriptedModel::replying("anything");
    let retriever = MultiQueryRetriever::new(
        TableEmbedder::new(&[]),
        Arc::clone(&model) as Arc<dyn LanguageModel>,
        index,
        RetrievalConfig {
            query_variants: 0,
            ..RetrievalConfig::default()
        },
    );

    let results = retriever.retrieve("kb", "hours?").await.expect("retrieval");
    assert_eq!(results[0].chunk.text, "Support is open on weekdays");
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn unknown_collection_is_not_found() {
    let embedder = TableEmbedder::new(&[]);
    let model = ScriptedModel::replying("another phrasing");
    let retriever = MultiQueryRetriever::new(
        Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>,
        Arc::clone(&model) as Arc<dyn LanguageModel>,
        Arc::new(InMemoryIndex::new()),
        RetrievalConfig::default(),
    );

    let result = retriever.retrieve("missing", "hello?").await;
    assert!(matches!(result, Err(RagError::NotFound(name)) if name == "missing"));
    assert_eq!(model.calls(), 0);
    assert!(embedder.calls().is_empty());
}

#[tokio::test]
async fn emptied_collection_skips_expansion() {
    let index = Arc::new(InMemoryIndex::new());
    index.create_or_get("kb").await.expect("should create collection");
    let model = ScriptedModel::replying("another phrasing");
    let retriever = MultiQueryRetriever::new(
        TableEmbedder::new(&[]),
        Arc::clone(&model) as Arc<dyn LanguageModel>,
        index,
        RetrievalConfig::default(),
    );

    let result = retriever.retrieve("kb", "hello?").await;
    assert!(matches!(result, Err(RagError::NotFound(_))));
    assert_eq!(model.calls(), 0);
}
