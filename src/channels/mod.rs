// Messaging channel adapters
// Adapters only see the query boundary, never the retrieval internals.

pub mod telegram;

use async_trait::async_trait;

use crate::pipeline::{QueryRequest, QueryResponse, RagService};

/// Reply sent when a query comes back without an answer
pub const DEFAULT_APOLOGY: &str = "Sorry, I couldn't process your request.";

/// Anything that can turn a question into a response without failing
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle_query(&self, request: QueryRequest) -> QueryResponse;
}

#[async_trait]
impl QueryHandler for RagService {
    async fn handle_query(&self, request: QueryRequest) -> QueryResponse {
        self.query(request).await
    }
}

/// Text to send back for a response: the answer verbatim, or the apology
#[inline]
pub fn reply_text(response: &QueryResponse) -> &str {
    response.answer.as_deref().unwrap_or(DEFAULT_APOLOGY)
}
