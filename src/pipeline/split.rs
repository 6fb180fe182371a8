//! Document splitting: one input file → an ordered sequence of [`Page`]s.
//!
//! | Kind  | Pages                                                         |
//! |-------|---------------------------------------------------------------|
//! | PDF   | one per selected page, image or text layer per strategy       |
//! | DOCX  | one text page built from `word/document.xml` paragraphs        |
//! | Image | one image page, longest edge capped at `max_rendered_pixels`  |
//! | Text  | one text page                                                 |
//!
//! A document without any content splits into zero pages; that is not an
//! error. A document that cannot be opened at all is.

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, PageError};
use crate::output::Page;
use crate::pipeline::encode::normalise_image;
use crate::pipeline::input::{detect_kind, read_head, DocumentKind};
use crate::pipeline::render::render_pages;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;

/// Pages of one document, in document order.
#[derive(Debug, Default)]
pub struct SplitDocument {
    pub pages: Vec<Page>,
    /// Pages of an otherwise readable document that could not be produced.
    pub page_errors: Vec<PageError>,
}

impl SplitDocument {
    fn single(page: Option<Page>) -> Self {
        Self {
            pages: page.into_iter().collect(),
            page_errors: Vec::new(),
        }
    }

    /// Pages plus per-page errors.
    pub fn total_pages(&self) -> usize {
        self.pages.len() + self.page_errors.len()
    }
}

/// Turns a local file into pages.
#[async_trait]
pub trait DocumentSplitter: Send + Sync {
    async fn split(&self, path: &Path, config: &ExtractionConfig) -> Result<SplitDocument, ExtractError>;
}

/// Splitter for every format listed in the module docs.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSplitter;

#[async_trait]
impl DocumentSplitter for FileSplitter {
    async fn split(&self, path: &Path, config: &ExtractionConfig) -> Result<SplitDocument, ExtractError> {
        let head = read_head(path)?;
        let kind = detect_kind(path, &head).ok_or_else(|| ExtractError::UnsupportedFormat {
            path: path.to_path_buf(),
            detail: "unrecognised file signature and extension".into(),
        })?;
        debug!("{}: detected {:?}", path.display(), kind);

        match kind {
            DocumentKind::Pdf => {
                let mut split = SplitDocument::default();
                for result in render_pages(path, config).await? {
                    match result {
                        Ok(page) => split.pages.push(page),
                        Err(e) => split.page_errors.push(e),
                    }
                }
                Ok(split)
            }
            DocumentKind::Docx => {
                let bytes = read_all(path).await?;
                let owned = path.to_path_buf();
                let text = tokio::task::spawn_blocking(move || docx_text(&bytes))
                    .await
                    .map_err(|e| ExtractError::Internal(format!("DOCX task panicked: {}", e)))?
                    .map_err(|detail| ExtractError::CorruptDocument { path: owned, detail })?;
                Ok(SplitDocument::single(text_page(text)))
            }
            DocumentKind::Image => {
                let bytes = read_all(path).await?;
                let max_px = config.max_rendered_pixels;
                let (bytes, mime) = tokio::task::spawn_blocking(move || normalise_image(&bytes, max_px))
                    .await
                    .map_err(|e| ExtractError::Internal(format!("Image task panicked: {}", e)))?
                    .map_err(|e| ExtractError::CorruptDocument {
                        path: path.to_path_buf(),
                        detail: e.to_string(),
                    })?;
                Ok(SplitDocument::single(Some(Page::image(0, bytes, mime))))
            }
            DocumentKind::Text => {
                let bytes = read_all(path).await?;
                let text = String::from_utf8(bytes).map_err(|_| ExtractError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    detail: "text file is not valid UTF-8".into(),
                })?;
                Ok(SplitDocument::single(text_page(text)))
            }
        }
    }
}

fn text_page(text: String) -> Option<Page> {
    (!text.trim().is_empty()).then(|| Page::text(0, text))
}

async fn read_all(path: &Path) -> Result<Vec<u8>, ExtractError> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::NotFound => ExtractError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => ExtractError::CorruptDocument {
            path: path.to_path_buf(),
            detail: e.to_string(),
        },
    })
}

// ── DOCX ─────────────────────────────────────────────────────────────────────

// Field codes (`HYPERLINK "mailto:…"`) and deleted revisions are not visible text.
static RE_HIDDEN_RUNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<w:instrText(?:\s[^>]*[^/>])?>.*?</w:instrText>|<w:delText(?:\s[^>]*[^/>])?>.*?</w:delText>").unwrap()
});
static RE_PARAGRAPH_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"</w:p>|<w:br\s*/>|<w:cr\s*/>").unwrap());
static RE_TAB: Lazy<Regex> = Lazy::new(|| Regex::new(r"<w:tab\s*/>").unwrap());
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static RE_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&(#x[0-9A-Fa-f]+|#[0-9]+|amp|lt|gt|quot|apos);").unwrap());
static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").unwrap());

/// Body text of a DOCX package, one line per paragraph.
pub fn docx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|_| "not a Word document: word/document.xml missing".to_string())?
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;

    let text = RE_HIDDEN_RUNS.replace_all(&xml, "");
    let text = RE_PARAGRAPH_END.replace_all(&text, "\n");
    let text = RE_TAB.replace_all(&text, "\t");
    let text = RE_TAG.replace_all(&text, "");
    let text = RE_ENTITY.replace_all(&text, |caps: &Captures| decode_entity(&caps[1]));
    let text = RE_BLANK_LINES.replace_all(&text, "\n\n");
    Ok(text.trim().to_string())
}

fn decode_entity(name: &str) -> String {
    let decoded = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => name
            .strip_prefix("#x")
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .or_else(|| name.strip_prefix('#').and_then(|dec| dec.parse().ok()))
            .and_then(char::from_u32),
    };
    decoded.map(String::from).unwrap_or_else(|| format!("&{name};"))
}
