
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("ragdesk/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Document not found: {0}")]
    Missing(String),
    #[error("Failed to read {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Not a readable PDF ({path}): {reason}")]
    InvalidPdf { path: String, reason: String },
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("No extractable text in {0}")]
    Empty(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Text,
    Url,
}

impl DocumentKind {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Text => "text",
            DocumentKind::Url => "url",
        }
    }
}

impl fmt::Display for DocumentKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a knowledge-base document comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    Pdf(PathBuf),
    Text(PathBuf),
    Url(Url),
}

impl DocumentSource {
    /// Classify a command line argument as a URL, a PDF path or a plain text path
    #[inline]
    pub fn detect(input: &str) -> Result<Self, LoadError> {
        let trimmed = input.trim();
        let lower = trimmed.to_ascii_lowercase();

        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Url::parse(trimmed)
                .map(DocumentSource::Url)
                .map_err(|e| LoadError::Fetch {
                    url: trimmed.to_string(),
                    reason: e.to_string(),
                });
        }

        let path = PathBuf::from(trimmed);
        let is_pdf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        Ok(if is_pdf {
            DocumentSource::Pdf(path)
        } else {
            DocumentSource::Text(path)
        })
    }

    #[inline]
    pub fn kind(&self) -> DocumentKind {
        match self {
            DocumentSource::Pdf(_) => DocumentKind::Pdf,
            DocumentSource::Text(_) => DocumentKind::Text,
            DocumentSource::Url(_) => DocumentKind::Url,
        }
    }

    /// Human readable origin, stored alongside every chunk
    #[inline]
    pub fn describe(&self) -> String {
        match self {
            DocumentSource::Pdf(path) | DocumentSource::Text(path) => path.display().to_string(),
            DocumentSource::Url(url) => url.to_string(),
        }
    }
}

/// Text of a single page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub text: String,
    /// 1-based
    pub page: u32,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    pub document_id: String,
    pub source: String,
    pub kind: DocumentKind,
    pub pages: Vec<PageRecord>,
}

impl LoadedDocument {
    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Load a document into page records. Blocking: run it off the async runtime.
#[inline]
pub fn load_document(source: &DocumentSource) -> Result<LoadedDocument, LoadError> {
    let description = source.describe();

    let texts = match source {
        DocumentSource::Pdf(path) => load_pdf_pages(path)?,
        DocumentSource::Text(path) => vec![read_text_file(path)?],
        DocumentSource::Url(url) => vec![fetch_page_text(url)?],
    };

    let pages: Vec<PageRecord> = texts
        .into_iter()
        .zip(1u32..)
        .map(|(text, page)| PageRecord {
            text: normalize_text(&text),
            page,
            source: description.clone(),
        })
        .collect();

    if pages.iter().all(|page| page.text.trim().is_empty()) {
        return Err(LoadError::Empty(description));
    }

    info!("Loaded {} pages from {}", pages.len(), description);

    Ok(LoadedDocument {
        document_id: Uuid::new_v4().to_string(),
        source: description,
        kind: source.kind(),
        pages,
    })
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            LoadError::Missing(path.display().to_string())
        } else {
            LoadError::Unreadable {
                path: path.display().to_string(),
                source: e,
            }
        }
    })
}

fn load_pdf_pages(path: &Path) -> Result<Vec<String>, LoadError> {
    let bytes = read_bytes(path)?;
    let invalid = |reason: String| LoadError::InvalidPdf {
        path: path.display().to_string(),
        reason,
    };

    if !bytes.starts_with(b"%PDF") {
        return Err(invalid("missing %PDF header".to_string()));
    }

    let document = lopdf::Document::load_mem(&bytes).map_err(|e| invalid(e.to_string()))?;
    let pages = document.get_pages();

    if pages.is_empty() {
        return Err(invalid("document has no pages".to_string()));
    }

    let texts = pages
        .keys()
        .map(|&page_number| {
            document.extract_text(&[page_number]).unwrap_or_else(|e| {
                warn!(
                    "Could not extract text from page {} of {}: {}",
                    page_number,
                    path.display(),
                    e
                );
                String::new()
            })
        })
        .collect();

    Ok(texts)
}

fn read_text_file(path: &Path) -> Result<String, LoadError> {
    let bytes = read_bytes(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn fetch_page_text(url: &Url) -> Result<String, LoadError> {
    let fetch_error = |reason: String| LoadError::Fetch {
        url: url.to_string(),
        reason,
    };

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(FETCH_TIMEOUT))
        .user_agent(USER_AGENT)
        .build()
        .into();

    debug!("Fetching {}", url);
    let mut response = agent.get(url.as_str()).call().map_err(|e| match e {
        ureq::Error::StatusCode(code) => fetch_error(format!("HTTP error {code}")),
        other => fetch_error(other.to_string()),
    })?;

    let is_html = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("html"));

    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| fetch_error(e.to_string()))?;

    Ok(if is_html {
        extract_visible_text(&body)
    } else {
        body
    })
}

/// Visible text of an HTML page, one text run per line
pub(crate) fn extract_visible_text(html: &str) -> String {
    let mut document = Html::parse_document(html);
    if let Ok(hidden) = Selector::parse("script, style, noscript, nav, header, footer, template") {
        let hidden_ids: Vec<_> = document.select(&hidden).map(|element| element.id()).collect();
        for node_id in hidden_ids {
            if let Some(mut node) = document.tree.get_mut(node_id) {
                node.detach();
            }
        }
    }

    let root = Selector::parse("body")
        .ok()
        .and_then(|body| document.select(&body).next())
        .unwrap_or_else(|| document.root_element());

    root.text()
        .map(str::trim)
        .filter(|run| !run.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalize_text(text: &str) -> String {
    text.replace('\0', "")
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim()
        .to_string()
}
