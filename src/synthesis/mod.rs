// Prompt assembly and answer generation


use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ConfigError;
use crate::database::vector_store::SearchResult;
use crate::memory::{ConversationMemory, ConversationTurn, format_history};
use crate::providers::{LanguageModel, ProviderError};

/// User-facing text returned when answering fails for any reason
pub const FALLBACK_ANSWER: &str = "An error occurred while processing your request.";

/// Separates retrieved passages inside the `{context}` slot
pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

pub const DEFAULT_PROMPT_TEMPLATE: &str = "You are the support assistant of a company that offers specialised services to its customers. \
Answer accurately and concisely using only the context and the chat history below.

1. Base your answer on the provided context and chat history.
2. Keep the answer clear, short and directly related to the context.
3. If the question is unrelated to the context, reply with: \"I'm sorry, but I can only answer questions related to the provided context. Please provide more information or ask a related question.\"

Context: {context}
Chat History: {history}
Question: {question}
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Context,
    History,
    Question,
}

impl Slot {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "context" => Some(Self::Context),
            "history" => Some(Self::History),
            "question" => Some(Self::Question),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(Slot),
}

/// A parsed prompt template.
///
/// Recognises `{context}`, `{history}` and `{question}`; any other brace text is kept
/// literally. Substituted values are inserted as-is and never scanned again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    #[inline]
    pub fn new(template: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            let (before, from_brace) = rest.split_at(open);
            literal.push_str(before);

            let slot = from_brace.find('}').and_then(|close| {
                from_brace
                    .get(1..close)
                    .and_then(Slot::from_name)
                    .map(|slot| (slot, close))
            });

            match slot {
                Some((slot, close)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Slot(slot));
                    rest = from_brace.get(close + 1..).unwrap_or_default();
                }
                None => {
                    literal.push('{');
                    rest = from_brace.get(1..).unwrap_or_default();
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let template = Self { segments };
        for (slot, name) in [(Slot::Question, "{question}"), (Slot::Context, "{context}")] {
            if !template.has_slot(slot) {
                return Err(ConfigError::InvalidTemplate(format!(
                    "template must contain {name}"
                )));
            }
        }

        Ok(template)
    }

    fn has_slot(&self, slot: Slot) -> bool {
        self.segments.contains(&Segment::Slot(slot))
    }

    #[inline]
    pub fn uses_history(&self) -> bool {
        self.has_slot(Slot::History)
    }

    #[inline]
    pub fn render(&self, context: &str, history: &str, question: &str) -> String {
        let mut prompt = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => prompt.push_str(text),
                Segment::Slot(Slot::Context) => prompt.push_str(context),
                Segment::Slot(Slot::History) => prompt.push_str(history),
                Segment::Slot(Slot::Question) => prompt.push_str(question),
            }
        }
        prompt
    }
}

/// Where a passage used for an answer came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub source: String,
    pub page: u32,
    pub similarity_score: f32,
}

impl From<&SearchResult> for Citation {
    #[inline]
    fn from(result: &SearchResult) -> Self {
        Self {
            chunk_id: result.chunk.id.clone(),
            source: result.chunk.metadata.source.clone(),
            page: result.chunk.metadata.page,
            similarity_score: result.similarity_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

impl Answer {
    #[inline]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
    template: PromptTemplate,
}

impl AnswerSynthesizer {
    #[inline]
    pub fn new(model: Arc<dyn LanguageModel>, template: PromptTemplate) -> Self {
        Self { model, template }
    }

    #[inline]
    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    #[inline]
    pub fn build_prompt(
        &self,
        question: &str,
        chunks: &[SearchResult],
        history: &[ConversationTurn],
    ) -> String {
        let context = chunks
            .iter()
            .map(|result| result.chunk.text.as_str())
            .join(CONTEXT_DELIMITER);
        self.template
            .render(&context, &format_history(history), question)
    }

    /// Ask the model and record the exchange in `memory` when it answers
    #[inline]
    pub async fn synthesize(
        &self,
        question: &str,
        chunks: &[SearchResult],
        memory: &mut ConversationMemory,
    ) -> Result<Answer, ProviderError> {
        let prompt = self.build_prompt(question, chunks, &memory.snapshot());
        debug!(
            "Prompt for {} has {} characters from {} passages",
            self.model.name(),
            prompt.chars().count(),
            chunks.len()
        );

        let text = self.model.complete(&prompt).await?.trim().to_string();
        let answer = Answer {
            text,
            citations: chunks.iter().map(Citation::from).collect(),
        };

        if answer.is_blank() {
            info!("Model returned an empty answer");
        } else {
            memory.append(ConversationTurn::new(question, answer.text.clone()));
        }

        Ok(answer)
    }
}
