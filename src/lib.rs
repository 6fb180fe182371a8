//! # resume2json
//!
//! Extract structured candidate data (name, contact details, documents,
//! address, education) from résumés in PDF, DOCX, image or plain-text form
//! using large language models, producing one JSON record per document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Document
//!  │
//!  ├─ 1. Input      resolve local file, URL or Drive link; detect format
//!  ├─ 2. Split      ordered pages: rasterised images or text blocks
//!  ├─ 3. Extract    one model call per page, concurrent and retried
//!  ├─ 4. Parse      tolerant JSON recovery, normalised to the field schema
//!  ├─ 5. Reconcile  per-field merge across pages (first- or longest-wins)
//!  └─ 6. Persist    <out_dir>/<document>.json, schema keys in schema order
//! ```
//!
//! A page that fails (model error, timeout, unreadable answer) contributes
//! nothing but never aborts its document, and every record carries exactly
//! the schema's keys.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resume2json::{ExtractionConfig, Extractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let extractor = Extractor::new(ExtractionConfig::default())?;
//!     let done = extractor.extract_to_dir("curriculo.pdf", "out").await?;
//!     println!("{} → {}", done.record.document, done.path.display());
//!     println!("nome: {:?}", done.record.value("nome"));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `resume2json` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! resume2json = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ExtractionConfig, ExtractionConfigBuilder, ExtractionStrategy, MergeMode, PageSelection,
    DEFAULT_UNKNOWN_SENTINEL,
};
pub use error::{ExtractError, InvokeError, PageError};
pub use extract::{extract, extract_sync, BatchItem, ExtractedDocument, Extractor};
pub use output::{
    CandidateRecord, ExtractionStats, FieldMap, Page, PageContent, PageOutcome, PageResult,
    RecordStatus, TokenUsage,
};
pub use pipeline::llm::{LlmInvoker, ModelInvoker, ModelReply};
pub use pipeline::parse::parse_response;
pub use pipeline::reconcile::Reconciler;
pub use pipeline::split::{DocumentSplitter, FileSplitter, SplitDocument};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{FieldSchema, FieldSpec};
