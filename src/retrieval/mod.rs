// Multi-query retrieval: paraphrase the question, search with every phrasing, merge

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::database::vector_store::{
    DEFAULT_TOP_K, IndexError, SearchResult, VectorIndex, rank_results,
};
use crate::providers::{EmbeddingProvider, InputKind, LanguageModel, ProviderError};

const MAX_QUERY_VARIANTS: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Hits requested from the index per phrasing
    pub top_k: usize,
    /// Alternative phrasings asked of the language model, 0 disables expansion
    pub query_variants: usize,
    /// Cap on the merged result set
    pub max_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            query_variants: 3,
            max_results: 8,
        }
    }
}

impl RetrievalConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }
        if self.query_variants > MAX_QUERY_VARIANTS {
            return Err(ConfigError::InvalidQueryVariants(self.query_variants));
        }
        if self.max_results < self.top_k {
            return Err(ConfigError::InvalidMaxResults {
                max_results: self.max_results,
                top_k: self.top_k,
            });
        }
        Ok(())
    }
}

fn expansion_prompt(question: &str, variants: usize) -> String {
    format!(
        "You help a search engine find passages in a company knowledge base. \
         Write {variants} different versions of the user question below so that together \
         they cover other wordings and angles of the same request. \
         Put each version on its own line with no numbering or commentary.\n\n\
         Question: {question}"
    )
}

fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim();
    let without_bullet = trimmed
        .strip_prefix(['-', '*', '•'])
        .map_or(trimmed, str::trim_start);

    let digits = without_bullet
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(without_bullet.len());
    if digits > 0 {
        let after_digits = without_bullet.get(digits..).unwrap_or_default();
        if let Some(rest) = after_digits.strip_prefix(['.', ')', ':']) {
            return rest.trim_start();
        }
    }
    without_bullet
}

/// Turn a model reply into at most `limit` distinct phrasings other than `question`
pub(crate) fn parse_variants(reply: &str, question: &str, limit: usize) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(question.trim().to_lowercase());

    reply
        .lines()
        .map(strip_list_marker)
        .map(|line| line.trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace()))
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_lowercase()))
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// Merge per-phrasing hits: every hit of the original phrasing stays, the rest fill up
/// to `max_results` by score. Duplicates keep their best score.
pub(crate) fn merge_results(
    primary: Vec<SearchResult>,
    expanded: Vec<Vec<SearchResult>>,
    max_results: usize,
) -> Vec<SearchResult> {
    let mut best: HashMap<String, SearchResult> = HashMap::new();
    let mut keep: HashSet<String> = HashSet::new();

    for result in primary {
        keep.insert(result.chunk.id.clone());
        best.insert(result.chunk.id.clone(), result);
    }

    for result in expanded.into_iter().flatten() {
        match best.get_mut(&result.chunk.id) {
            Some(existing) if existing.similarity_score >= result.similarity_score => {}
            Some(existing) => existing.similarity_score = result.similarity_score,
            None => {
                best.insert(result.chunk.id.clone(), result);
            }
        }
    }

    let (mut merged, mut extras): (Vec<SearchResult>, Vec<SearchResult>) = best
        .into_values()
        .partition(|result| keep.contains(&result.chunk.id));

    rank_results(&mut extras);
    let room = max_results.saturating_sub(merged.len());
    merged.extend(extras.into_iter().take(room));

    rank_results(&mut merged);
    merged
}

pub struct MultiQueryRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn LanguageModel>,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl MultiQueryRetriever {
    #[inline]
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            model,
            index,
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ask the model for alternative phrasings; `None` when expansion is off or unusable
    async fn expand(&self, question: &str) -> Option<Vec<String>> {
        if self.config.query_variants == 0 {
            return None;
        }

        let reply = match self
            .model
            .complete(&expansion_prompt(question, self.config.query_variants))
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    "Query expansion failed, using the original question only: {}",
                    e
                );
                return None;
            }
        };

        let variants = parse_variants(&reply, question, self.config.query_variants);
        if variants.is_empty() {
            warn!("Query expansion produced no usable variants, using the original question only");
            return None;
        }

        debug!("Expanded question into {} variants: {:?}", variants.len(), variants);
        Some(variants)
    }

    async fn embed_queries(&self, queries: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        let vectors = self.embedder.embed(queries, InputKind::Query).await?;
        if vectors.len() != queries.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} query embeddings, got {}",
                queries.len(),
                vectors.len()
            ))
            .into());
        }
        Ok(vectors)
    }

    /// Search with the question alone
    #[inline]
    pub async fn retrieve_single(
        &self,
        collection: &str,
        question: &str,
    ) -> crate::Result<Vec<SearchResult>> {
        let vectors = self.embed_queries(&[question.to_string()]).await?;
        let Some(vector) = vectors.first() else {
            return Ok(Vec::new());
        };

        let results = self
            .index
            .search(collection, vector, self.config.top_k)
            .await?;
        Ok(results)
    }

    /// Search with the question and its model-written variants, merged by chunk
    #[inline]
    pub async fn retrieve(
        &self,
        collection: &str,
        question: &str,
    ) -> crate::Result<Vec<SearchResult>> {
        // an empty collection answers NotFound without spending a model call
        if self.index.count(collection).await? == 0 {
            return Err(IndexError::NotFound {
                collection: collection.to_string(),
            }
            .into());
        }

        let Some(variants) = self.expand(question).await else {
            return self.retrieve_single(collection, question).await;
        };

        let mut queries = Vec::with_capacity(variants.len() + 1);
        queries.push(question.to_string());
        queries.extend(variants);

        let vectors = self.embed_queries(&queries).await?;
        let mut per_query = Vec::with_capacity(vectors.len());
        for vector in &vectors {
            per_query.push(
                self.index
                    .search(collection, vector, self.config.top_k)
                    .await?,
            );
        }

        let mut per_query = per_query.into_iter();
        let primary = per_query.next().unwrap_or_default();
        let merged = merge_results(primary, per_query.collect(), self.config.max_results);

        debug!(
            "Retrieved {} passages from {} for {} phrasings",
            merged.len(),
            collection,
            queries.len()
        );
        Ok(merged)
    }
}
