//! Progress-callback trait for per-document and per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as documents are split and their pages sent to the model.
//!
//! # Example
//!
//! ```rust
//! use resume2json::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     pages: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, document: &str, page_num: usize, _total: usize, fields: usize) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{document} p{page_num}: {fields} fields");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { pages: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes documents and pages.
///
/// Pages of one document, and documents of one batch, run concurrently, so
/// methods may be called from several tasks at once. All methods default to
/// no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// A document was split; `total_pages` pages will be sent to the model.
    fn on_document_start(&self, document: &str, total_pages: usize) {
        let _ = (document, total_pages);
    }

    /// The model request for a page is about to be sent.
    fn on_page_start(&self, document: &str, page_num: usize, total_pages: usize) {
        let _ = (document, page_num, total_pages);
    }

    /// A page produced a field map with `known_fields` known values.
    fn on_page_complete(&self, document: &str, page_num: usize, total_pages: usize, known_fields: usize) {
        let _ = (document, page_num, total_pages, known_fields);
    }

    /// A page failed; the failure is contained.
    fn on_page_error(&self, document: &str, page_num: usize, total_pages: usize, error: &str) {
        let _ = (document, page_num, total_pages, error);
    }

    /// The record for a document was reconciled.
    fn on_document_complete(&self, document: &str, resolved_fields: usize, total_fields: usize) {
        let _ = (document, resolved_fields, total_fields);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
