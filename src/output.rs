//! Data carried between pipeline stages and returned to callers.
//!
//! ```text
//! Page ──▶ PageResult (one per page) ──▶ CandidateRecord (one per document)
//! ```
//!
//! Every [`PageResult`] carries its originating page index so the reconciler
//! can restore page order no matter in which order concurrent calls finished.

use crate::config::MergeMode;
use crate::error::PageError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field key → extracted value. `None` means the field is unknown.
///
/// Iteration order is always the schema order.
pub type FieldMap = IndexMap<String, Option<String>>;

// ── Pages ────────────────────────────────────────────────────────────────

/// One unit of model input derived from a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 0-indexed position in the source document.
    pub index: usize,
    pub content: PageContent,
}

/// What the model is shown for one page.
#[derive(Clone, PartialEq)]
pub enum PageContent {
    /// Text extracted from the page (PDF text layer, DOCX body, plain text).
    Text(String),
    /// Encoded image bytes (PNG/JPEG/...), sent to a vision model.
    Image { bytes: Vec<u8>, mime_type: String },
}

impl fmt::Debug for PageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageContent::Text(text) => f
                .debug_struct("Text")
                .field("chars", &text.chars().count())
                .finish(),
            PageContent::Image { bytes, mime_type } => f
                .debug_struct("Image")
                .field("bytes", &bytes.len())
                .field("mime_type", mime_type)
                .finish(),
        }
    }
}

impl Page {
    pub fn text(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            content: PageContent::Text(text.into()),
        }
    }

    pub fn image(index: usize, bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            index,
            content: PageContent::Image {
                bytes,
                mime_type: mime_type.into(),
            },
        }
    }

    /// 1-indexed page number, as shown to users.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn is_image(&self) -> bool {
        matches!(self.content, PageContent::Image { .. })
    }
}

// ── Per-page results ─────────────────────────────────────────────────────

/// Token usage reported by the model for one or more calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// What one page produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageOutcome {
    /// A field map with exactly the schema keys.
    Extracted { fields: FieldMap },
    /// No field map could be produced. Contributes nothing to the record.
    Failed { error: PageError },
}

/// The outcome of processing one page, plus call metadata.
///
/// Created once by the page extractor, consumed once by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 0-indexed position of the page in its document.
    pub page_index: usize,
    pub outcome: PageOutcome,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    /// Retries spent before the final answer (0 = first attempt).
    pub retries: u32,
}

impl PageResult {
    pub fn extracted(page_index: usize, fields: FieldMap) -> Self {
        Self {
            page_index,
            outcome: PageOutcome::Extracted { fields },
            usage: TokenUsage::default(),
            duration_ms: 0,
            retries: 0,
        }
    }

    pub fn failed(page_index: usize, error: PageError) -> Self {
        Self {
            page_index,
            outcome: PageOutcome::Failed { error },
            usage: TokenUsage::default(),
            duration_ms: 0,
            retries: 0,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn page_num(&self) -> usize {
        self.page_index + 1
    }

    pub fn fields(&self) -> Option<&FieldMap> {
        match &self.outcome {
            PageOutcome::Extracted { fields } => Some(fields),
            PageOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&PageError> {
        match &self.outcome {
            PageOutcome::Extracted { .. } => None,
            PageOutcome::Failed { error } => Some(error),
        }
    }

    /// Number of fields with a known value.
    pub fn known_fields(&self) -> usize {
        self.fields()
            .map(|f| f.values().filter(|v| v.is_some()).count())
            .unwrap_or(0)
    }
}

// ── Document records ─────────────────────────────────────────────────────

/// Document-level outcome, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Every page produced a field map.
    Complete,
    /// Some pages failed; the record holds what the others contributed.
    Partial,
    /// The document had pages but none produced a field map.
    AllPagesFailed,
    /// The document split into zero pages.
    NoPages,
}

/// Diagnostic detail kept for a failed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFailure {
    /// 1-indexed page number.
    pub page: usize,
    pub reason: String,
    /// The untouched model answer when the failure was a parse failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

/// Counters for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    pub extracted_pages: usize,
    pub failed_pages: usize,
    /// Pages whose value won at least one field.
    pub contributing_pages: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Rough cost estimate; never used for any decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,
}

/// The canonical, reconciled record for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Document base name (file stem); also the persisted file name.
    pub document: String,
    /// Exactly the schema keys, in schema order.
    pub fields: FieldMap,
    /// 1-indexed page that supplied each resolved field.
    pub sources: IndexMap<String, usize>,
    pub merge_mode: MergeMode,
    pub status: RecordStatus,
    pub stats: ExtractionStats,
    pub failures: Vec<PageFailure>,
}

impl CandidateRecord {
    /// Known value for `key`, if any.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_deref())
    }

    /// Number of fields with a known value.
    pub fn resolved_count(&self) -> usize {
        self.fields.values().filter(|v| v.is_some()).count()
    }

    /// `true` when pages existed and none of them produced a field map.
    pub fn is_total_failure(&self) -> bool {
        self.status == RecordStatus::AllPagesFailed
    }

    /// The persisted form: schema keys → string, with unknown fields written
    /// either as `sentinel` or as JSON `null`.
    pub fn persisted_fields<'a>(
        &'a self,
        sentinel: &'a str,
        unknown_as_null: bool,
    ) -> IndexMap<&'a str, Option<&'a str>> {
        self.fields
            .iter()
            .map(|(key, value)| {
                let value = match value.as_deref() {
                    Some(v) => Some(v),
                    None if unknown_as_null => None,
                    None => Some(sentinel),
                };
                (key.as_str(), value)
            })
            .collect()
    }

    /// Pretty JSON of [`CandidateRecord::persisted_fields`]. Key order is the
    /// schema order and non-ASCII text is written as-is.
    pub fn to_persisted_json(
        &self,
        sentinel: &str,
        unknown_as_null: bool,
    ) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.persisted_fields(sentinel, unknown_as_null))
    }
}
