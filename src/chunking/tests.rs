use super::*;
use crate::loader::{DocumentKind, LoadedDocument, PageRecord};

fn page_text(sentence: &str, target_len: usize) -> String {
    let mut text = String::new();
    while text.chars().count() + sentence.chars().count() + 1 <= target_len {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(sentence);
    }
    while text.chars().count() < target_len {
        text.push('.');
    }
    text
}

fn document(pages: Vec<String>) -> LoadedDocument {
    LoadedDocument {
        document_id: "doc-1".to_string(),
        source: "handbook.pdf".to_string(),
        kind: DocumentKind::Pdf,
        pages: pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| PageRecord {
                text,
                page: u32::try_from(i + 1).expect("page number fits"),
                source: "handbook.pdf".to_string(),
            })
            .collect(),
    }
}

fn shared_chars(previous: &TextSpan, next: &TextSpan) -> usize {
    previous.end.saturating_sub(next.start)
}

#[test]
fn short_text_is_a_single_chunk() {
    let config = ChunkingConfig::default();
    let spans = split_text("Refunds are issued within 14 days.", &config);

    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].start, 0);
    assert_eq!(spans[0].end, 34);
}

#[test]
fn empty_text_has_no_chunks() {
    assert!(split_text("", &ChunkingConfig::default()).is_empty());
}

#[test]
fn chunks_respect_size_and_overlap() {
    let config = ChunkingConfig::new(200, 40).expect("valid config");
    let text = page_text("Our support desk answers every ticket within one day.", 2000);

    let spans = split_text(&text, &config);
    assert!(spans.len() > 1);

    for span in &spans {
        assert!(span.text.chars().count() <= 200, "chunk too long: {span:?}");
        assert_eq!(span.text.chars().count(), span.end - span.start);
    }
    for pair in spans.windows(2) {
        assert!(shared_chars(&pair[0], &pair[1]) >= 40);
    }
}

#[test]
fn prefers_paragraph_breaks() {
    let config = ChunkingConfig::new(100, 10).expect("valid config");
    let first = "a".repeat(60);
    let text = format!("{first}\n\nsecond paragraph with words that runs on for a while longer");

    let spans = split_text(&text, &config);
    assert!(spans[0].text.ends_with("\n\n"));
    assert_eq!(spans[0].end, 62);
}

#[test]
fn soft_breaks_never_make_tiny_chunks() {
    let config = ChunkingConfig::new(100, 10).expect("valid config");
    // The only paragraph break sits too early to be used
    let text = format!("intro\n\n{}", "word ".repeat(60));

    let spans = split_text(&text, &config);
    assert!(spans[0].text.chars().count() >= 50);
}

#[test]
fn hard_cut_without_boundaries() {
    let config = ChunkingConfig::new(50, 5).expect("valid config");
    let text = "x".repeat(120);

    let spans = split_text(&text, &config);
    assert_eq!(spans[0].end, 50);
    assert_eq!(spans[1].start, 45);
    assert_eq!(reassemble(&spans), text);
}

#[test]
fn next_chunk_starts_on_a_word() {
    let config = ChunkingConfig::new(120, 20).expect("valid config");
    let text = page_text("Shipping takes three to five business days.", 600);

    let spans = split_text(&text, &config);
    for span in spans.iter().skip(1) {
        let first = span.text.chars().next().expect("span is not empty");
        assert!(!first.is_whitespace(), "span starts with whitespace: {span:?}");
    }
}

#[test]
fn reassemble_is_lossless() {
    let texts = [
        page_text("Plans renew monthly, and you may cancel at any time.", 3000),
        "line one\nline two\n\nparagraph two; with clauses, commas. And sentences! Really?"
            .repeat(20),
        "ünïcödé wörds and emoji 🎉 mixed in with plain text ".repeat(40),
    ];

    for text in &texts {
        for (size, overlap) in [(1, 0), (10, 0), (10, 9), (64, 16), (1000, 100), (5000, 10)] {
            let config = ChunkingConfig::new(size, overlap).expect("valid config");
            let spans = split_text(text, &config);
            assert_eq!(&reassemble(&spans), text, "size {size} overlap {overlap}");
        }
    }
}

#[test]
fn three_page_document_makes_three_chunks() {
    let pages = vec![
        page_text("Refunds are available within 14 days of purchase.", 833),
        page_text("Support is available on weekdays from nine to five.", 833),
        page_text("Enterprise plans include a dedicated account manager.", 833),
    ];
    let doc = document(pages);

    let chunks = chunk_document(&doc, &ChunkingConfig::default());

    assert_eq!(chunks.len(), 3);
    for chunk in &chunks {
        assert!(chunk.text.chars().count() <= 1000);
        assert_eq!(chunk.metadata.document_id, "doc-1");
    }
    for pair in chunks.windows(2) {
        let shared = pair[0]
            .metadata
            .end_offset
            .saturating_sub(pair[1].metadata.start_offset);
        assert!(shared >= 100, "overlap was {shared}");
    }
    assert_eq!(
        chunks.iter().map(|c| c.metadata.chunk_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[test]
fn chunks_record_their_starting_page() {
    let pages = vec![
        page_text("First page sentence.", 500),
        page_text("Second page sentence.", 500),
        page_text("Third page sentence.", 500),
    ];
    let doc = document(pages);
    let config = ChunkingConfig::new(400, 50).expect("valid config");

    let chunks = chunk_document(&doc, &config);
    assert_eq!(chunks[0].metadata.page, 1);
    assert_eq!(chunks.last().expect("has chunks").metadata.page, 3);
    for pair in chunks.windows(2) {
        assert!(pair[0].metadata.page <= pair[1].metadata.page);
    }
}

#[test]
fn blank_pages_are_skipped() {
    let doc = document(vec![String::new(), "   ".to_string(), "Only text.".to_string()]);

    let chunks = chunk_document(&doc, &ChunkingConfig::default());
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "Only text.");
    assert_eq!(chunks[0].metadata.page, 3);
}

#[test]
fn config_validation() {
    assert!(ChunkingConfig::new(1000, 100).is_ok());
    assert!(matches!(
        ChunkingConfig::new(0, 0),
        Err(ConfigError::InvalidChunkSize(0))
    ));
    assert!(matches!(
        ChunkingConfig::new(100, 100),
        Err(ConfigError::InvalidChunkOverlap {
            overlap: 100,
            size: 100
        })
    ));
}

#[test]
fn large_chunk_sizes_are_accepted() {
    let config = ChunkingConfig::new(20_000, 500).expect("large sizes should be valid");
    let text = page_text("Orders over fifty euros ship free of charge.", 45_000);

    let spans = split_text(&text, &config);
    assert!(spans.len() >= 3);
    assert!(spans.iter().all(|span| span.text.chars().count() <= 20_000));
    assert!(spans[0].text.chars().count() > 8192);
    assert_eq!(reassemble(&spans), text);
}
