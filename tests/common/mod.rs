// Shared fixtures for the integration tests
#![allow(dead_code, reason = "each test binary uses a different subset of the fixtures")]

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use ragdesk::providers::{EmbeddingProvider, InputKind, LanguageModel, ProviderError};
use ragdesk::synthesis::CONTEXT_DELIMITER;
use std::path::Path;
use std::sync::Mutex;

pub const KEYWORDS: [&str; 4] = ["refund", "ship", "support", "warranty"];

/// Keyword counts plus a constant component so no vector is all zeros
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector = vec![0.1];
    vector.extend(KEYWORDS.iter().map(|k| lower.matches(*k).count() as f32));
    vector
}

pub struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn name(&self) -> &str {
        "keywords"
    }

    async fn embed(
        &self,
        texts: &[String],
        _kind: InputKind,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| keyword_vector(text)).collect())
    }
}

/// First passage of the prompt's context, or nothing when there is no context
pub fn echo_first_passage(prompt: &str) -> String {
    let Some((_, context)) = prompt.split_once("Context: ") else {
        return String::new();
    };
    context
        .split(CONTEXT_DELIMITER)
        .next()
        .unwrap_or_default()
        .split("\nChat History:")
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Deterministic model that answers with the highest ranked passage
#[derive(Default)]
pub struct EchoModel {
    prompts: Mutex<Vec<String>>,
}

impl EchoModel {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt lock").clone()
    }
}

#[async_trait]
impl LanguageModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        self.prompts
            .lock()
            .expect("prompt lock")
            .push(prompt.to_string());
        Ok(echo_first_passage(prompt))
    }
}

pub fn write_text(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("should write text file");
    path
}

/// Write a PDF with one single-line text object per page
pub fn write_pdf(path: &Path, pages: &[String]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Td", vec![40.into(), 760.into()]),
                Operation::new("Tj", vec![Object::string_literal(text.as_str())]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("should encode content stream"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = i64::try_from(kids.len()).expect("page count fits");
    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("should write pdf");
}

pub const FAQ: [(&str, &str); 3] = [
    (
        "refunds.txt",
        "Refunds are processed within 14 days of receiving the returned item.",
    ),
    (
        "shipping.txt",
        "We ship worldwide and shipping is free on orders over $50.",
    ),
    (
        "support.txt",
        "Support is available on weekdays from 9am to 5pm.",
    ),
];
