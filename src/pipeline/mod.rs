//! Pipeline stages for résumé field extraction.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ split ──▶ llm ──▶ parse ──▶ reconcile
//! (URL/path) (pages) (model)  (JSON)    (one record)
//! ```
//!
//! 1. [`input`]: canonicalise the user-supplied path or URL to a local file
//!    and detect its kind
//! 2. [`split`]: turn the file into ordered pages; PDFs go through
//!    [`render`] in `spawn_blocking`, images through [`encode`]
//! 3. [`llm`]: one model call per page with retry, timeout and a shared
//!    concurrency cap; the only stage with model I/O
//! 4. [`parse`]: tolerant decoding of the model's answer into a field map
//! 5. [`reconcile`]: per-field merge of all page maps into one record

pub mod encode;
pub mod input;
pub mod llm;
pub mod parse;
pub mod reconcile;
pub mod render;
pub mod split;
