//! Error types for the resume2json library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`]: **Fatal** for one document: the file cannot be
//!   found, read, or split into pages, or no model provider is configured.
//!   Returned as `Err(ExtractError)` from the document-level entry points.
//!
//! * [`PageError`]: **Contained**: a single page failed (model call error,
//!   timeout, unparseable response) but the other pages are fine. Stored inside
//!   [`crate::output::PageOutcome::Failed`] so the record is still produced from
//!   whatever succeeded.
//!
//! [`InvokeError`] sits at the model boundary: a [`crate::pipeline::llm::ModelInvoker`]
//! reports it, and the page extractor turns it into a [`PageError`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal, document-level errors returned by the library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Split errors ──────────────────────────────────────────────────────
    /// The file was read but its format is not one we can split into pages.
    #[error("Unsupported document '{path}': {detail}\nSupported: PDF, DOCX, PNG, JPEG, BMP, TIFF, WEBP, TXT.")]
    UnsupportedFormat { path: PathBuf, detail: String },

    /// The container was recognised but its contents could not be parsed.
    #[error("Document '{path}' is corrupt: {detail}")]
    CorruptDocument { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium could not produce the page sequence for the document.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON record.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A field schema was empty, had duplicate keys, or could not be decoded.
    #[error("Invalid field schema: {0}")]
    InvalidSchema(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// No usable pdfium library was found.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDF input needs libpdfium. Install it system-wide, or\n\
set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// `true` when the document could not be decomposed into pages.
    ///
    /// No partial record is emitted for these.
    pub fn is_split_failure(&self) -> bool {
        matches!(
            self,
            ExtractError::UnsupportedFormat { .. }
                | ExtractError::CorruptDocument { .. }
                | ExtractError::PasswordRequired { .. }
                | ExtractError::WrongPassword { .. }
                | ExtractError::RasterisationFailed { .. }
        )
    }
}

/// A contained error for a single page.
///
/// Page numbers are 1-indexed, matching what users see in a PDF viewer.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page could not be rasterised or encoded for the model.
    #[error("Page {page}: rendering failed: {detail}")]
    Render { page: usize, detail: String },

    /// The model call failed after retries.
    #[error("Page {page}: model call failed after {retries} retries: {detail}")]
    ModelCall {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// Every attempt of the model call timed out.
    #[error("Page {page}: model call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The model answered but no field map could be decoded from the answer.
    ///
    /// `raw_response` is kept verbatim for diagnosing model drift.
    #[error("Page {page}: unparseable model response: {reason}")]
    Parse {
        page: usize,
        reason: String,
        raw_response: String,
    },
}

impl PageError {
    /// The 1-indexed page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Render { page, .. }
            | PageError::ModelCall { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::Parse { page, .. } => *page,
        }
    }

    /// The raw model response, when the model did answer.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            PageError::Parse { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }
}

/// Failure reported by a [`crate::pipeline::llm::ModelInvoker`].
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    /// Transport, authentication, or rate-limit failure. Retried with backoff.
    #[error("{0}")]
    Call(String),

    /// The invoker cannot handle this kind of page (e.g. an image sent to a
    /// text-only model). Never retried.
    #[error("unsupported page: {0}")]
    Unsupported(String),
}

impl InvokeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, InvokeError::Call(_))
    }
}
