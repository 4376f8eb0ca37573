#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;
use crate::loader::LoadedDocument;

/// Break-point classes, strongest first
const SEPARATORS: &[&[&str]] = &[
    &["\n\n"],
    &["\n"],
    &[". ", "! ", "? "],
    &["; ", ", "],
    &[" "],
];

/// How far back the next chunk start may move to land on a word boundary
const MAX_WORD_SNAP: usize = 32;

/// Configuration for content chunking, measured in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Upper bound on a chunk's length
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunkOverlap {
                overlap: self.chunk_overlap,
                size: self.chunk_size,
            });
        }
        Ok(())
    }

    /// Shortest chunk a soft break may produce
    fn min_chunk_len(&self) -> usize {
        (self.chunk_size / 2).max(self.chunk_overlap + 1).max(1)
    }
}

/// A contiguous piece of the input with character offsets `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Where a chunk came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub source: String,
    /// 1-based page on which the chunk starts
    pub page: u32,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// A chunk of document text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Split `text` into overlapping spans of at most `chunk_size` characters.
///
/// Each span ends on the strongest available boundary (paragraph, line,
/// sentence, clause, word) that still leaves it at least half of
/// `chunk_size` long, falling back to a hard cut. The next span starts
/// `chunk_overlap` characters before the previous end, moved back to a
/// word start when one is close by.
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<TextSpan> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let mut spans = Vec::new();

    if total == 0 || config.chunk_size == 0 {
        return spans;
    }

    let size = config.chunk_size;
    let overlap = config.chunk_overlap.min(size - 1);
    let min_len = config.min_chunk_len().min(size);
    let mut start = 0;

    loop {
        if total - start <= size {
            spans.push(make_span(&chars, start, total));
            break;
        }

        let limit = start + size;
        let end = find_break(&chars, start + min_len, limit).unwrap_or(limit);
        spans.push(make_span(&chars, start, end));

        let mut next = end.saturating_sub(overlap).max(start + 1);
        next = snap_to_word_start(&chars, next, start + 1);
        start = next;
    }

    spans
}

/// Rebuild the original text from spans produced by [`split_text`]
#[inline]
pub fn reassemble(spans: &[TextSpan]) -> String {
    let mut output = String::new();
    let mut covered: usize = 0;

    for span in spans {
        let skip = covered.saturating_sub(span.start);
        output.extend(span.text.chars().skip(skip));
        covered = covered.max(span.end);
    }

    output
}

/// Chunk a loaded document; pages are joined with a blank line and split as one text
#[inline]
pub fn chunk_document(document: &LoadedDocument, config: &ChunkingConfig) -> Vec<TextChunk> {
    let mut joined = String::new();
    let mut page_starts: Vec<(usize, u32)> = Vec::new();
    let mut offset = 0;

    for page in document.pages.iter().filter(|p| !p.text.trim().is_empty()) {
        if !joined.is_empty() {
            joined.push_str("\n\n");
            offset += 2;
        }
        page_starts.push((offset, page.page));
        joined.push_str(&page.text);
        offset += page.text.chars().count();
    }

    let chunks: Vec<TextChunk> = split_text(&joined, config)
        .into_iter()
        .filter(|span| !span.text.trim().is_empty())
        .enumerate()
        .map(|(chunk_index, span)| TextChunk {
            metadata: ChunkMetadata {
                document_id: document.document_id.clone(),
                source: document.source.clone(),
                page: page_at(&page_starts, span.start),
                chunk_index,
                start_offset: span.start,
                end_offset: span.end,
            },
            text: span.text,
        })
        .collect();

    debug!(
        "Chunked '{}' ({} pages) into {} chunks",
        document.source,
        document.pages.len(),
        chunks.len()
    );

    chunks
}

fn make_span(chars: &[char], start: usize, end: usize) -> TextSpan {
    TextSpan {
        text: chars.get(start..end).unwrap_or_default().iter().collect(),
        start,
        end,
    }
}

/// Latest break position in `[min_end, limit]` for the strongest separator class present
fn find_break(chars: &[char], min_end: usize, limit: usize) -> Option<usize> {
    SEPARATORS.iter().find_map(|class| {
        (min_end..=limit)
            .rev()
            .find(|&end| class.iter().any(|sep| ends_with_at(chars, end, sep)))
    })
}

fn ends_with_at(chars: &[char], end: usize, separator: &str) -> bool {
    let len = separator.chars().count();
    end >= len
        && chars
            .get(end - len..end)
            .is_some_and(|window| window.iter().copied().eq(separator.chars()))
}

fn snap_to_word_start(chars: &[char], position: usize, floor: usize) -> usize {
    let is_word_start = |pos: usize| {
        chars.get(pos).is_some_and(|c| !c.is_whitespace())
            && (pos == 0 || chars.get(pos - 1).is_some_and(|c| c.is_whitespace()))
    };

    let lowest = position.saturating_sub(MAX_WORD_SNAP).max(floor);
    (lowest..=position)
        .rev()
        .find(|&pos| is_word_start(pos))
        .unwrap_or(position)
}

fn page_at(page_starts: &[(usize, u32)], offset: usize) -> u32 {
    page_starts
        .iter()
        .take_while(|(start, _)| *start <= offset)
        .last()
        .map_or(1, |(_, page)| *page)
}
