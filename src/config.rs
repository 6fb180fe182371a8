//! Configuration types for résumé extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. One config is shared by every page and
//! every document of a run, which keeps the unknown sentinel and merge mode
//! consistent within the run.

use crate::error::ExtractError;
use crate::pipeline::llm::ModelInvoker;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default literal written for fields that were not found.
pub const DEFAULT_UNKNOWN_SENTINEL: &str = "Não informado";

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Configuration for résumé extraction.
///
/// # Example
/// ```rust
/// use resume2json::{ExtractionConfig, MergeMode};
///
/// let config = ExtractionConfig::builder()
///     .concurrency(4)
///     .merge_mode(MergeMode::FirstWins)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI for PDF rasterisation. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Longest edge, in pixels, of any page image sent to the model. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Maximum model calls in flight at once, across all documents. Default: 5.
    pub concurrency: usize,

    /// Documents processed at once by batch extraction. Default: 2.
    pub document_concurrency: usize,

    /// Model identifier. If None, uses [`DEFAULT_MODEL`] or the provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed model invoker. Takes precedence over every provider setting.
    pub invoker: Option<Arc<dyn ModelInvoker>>,

    /// Sampling temperature. Default: 0.0 (extraction should be deterministic).
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 2048.
    pub max_tokens: usize,

    /// Retries on a retryable model failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Timeout applied to every single model call. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Pages of each PDF to process. Default: all.
    pub pages: PageSelection,

    /// How PDF pages are presented to the model. Default: [`ExtractionStrategy::Vision`].
    pub strategy: ExtractionStrategy,

    /// How per-page values are merged into one record. Default: [`MergeMode::LongestWins`].
    pub merge_mode: MergeMode,

    /// Literal meaning "field not found". Used in prompts, recognised in
    /// model answers, and written to persisted records.
    pub unknown_sentinel: String,

    /// Persist unknown fields as JSON `null` instead of the sentinel. Default: false.
    pub unknown_as_null: bool,

    /// Optional price per 1 000 tokens, for the cost estimate in record stats.
    pub cost_per_1k_tokens: Option<f64>,

    /// Receives per-document and per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 5,
            document_concurrency: 2,
            model: None,
            provider_name: None,
            provider: None,
            invoker: None,
            temperature: 0.0,
            max_tokens: 2048,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            password: None,
            pages: PageSelection::default(),
            strategy: ExtractionStrategy::default(),
            merge_mode: MergeMode::default(),
            unknown_sentinel: DEFAULT_UNKNOWN_SENTINEL.to_string(),
            unknown_as_null: false,
            cost_per_1k_tokens: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("document_concurrency", &self.document_concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("invoker", &self.invoker.as_ref().map(|i| i.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pages", &self.pages)
            .field("strategy", &self.strategy)
            .field("merge_mode", &self.merge_mode)
            .field("unknown_sentinel", &self.unknown_sentinel)
            .field("unknown_as_null", &self.unknown_as_null)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn invoker(mut self, invoker: Arc<dyn ModelInvoker>) -> Self {
        self.config.invoker = Some(invoker);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn strategy(mut self, strategy: ExtractionStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn merge_mode(mut self, mode: MergeMode) -> Self {
        self.config.merge_mode = mode;
        self
    }

    pub fn unknown_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.config.unknown_sentinel = sentinel.into();
        self
    }

    pub fn unknown_as_null(mut self, v: bool) -> Self {
        self.config.unknown_as_null = v;
        self
    }

    pub fn cost_per_1k_tokens(mut self, price: f64) -> Self {
        self.config.cost_per_1k_tokens = Some(price);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(ExtractError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 || c.document_concurrency == 0 {
            return Err(ExtractError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        if c.unknown_sentinel.trim().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "Unknown sentinel must not be empty; use unknown_as_null to persist nulls".into(),
            ));
        }
        if let Some(price) = c.cost_per_1k_tokens {
            if !price.is_finite() || price < 0.0 {
                return Err(ExtractError::InvalidConfig(format!(
                    "Cost per 1k tokens must be a non-negative number, got {price}"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How values from several pages are merged into one.
///
/// Both policies consider only usable values (known, non-empty), in page order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// The first page with a usable value wins. Suits single-form documents
    /// whose first page is authoritative.
    FirstWins,
    /// The longest usable value wins; equal lengths go to the earlier page.
    /// Suits multi-page résumés where every page carries the same weight. (default)
    #[default]
    LongestWins,
}

/// How PDF pages are turned into model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Rasterise every page and send the image to a vision model. (default)
    #[default]
    Vision,
    /// Send the PDF text layer; pages without text are sent as images.
    Text,
}

/// Specifies which pages of a PDF to process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page (default).
    #[default]
    All,
    /// Only the first `n` pages. Résumés rarely carry candidate data past page 2–3.
    First(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand into sorted, deduplicated 0-indexed page numbers within `total_pages`.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let in_range = |p: &usize| *p >= 1 && *p <= total_pages;
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::First(n) => (0..(*n).min(total_pages)).collect(),
            PageSelection::Range(start, end) => ((*start).max(1)..=(*end).min(total_pages))
                .map(|p| p - 1)
                .collect(),
            PageSelection::Set(pages) => pages.iter().filter(|p| in_range(p)).map(|p| p - 1).collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.merge_mode, MergeMode::LongestWins);
        assert_eq!(c.strategy, ExtractionStrategy::Vision);
        assert_eq!(c.unknown_sentinel, "Não informado");
        assert_eq!(c.temperature, 0.0);
        assert!(!c.unknown_as_null);
    }

    #[test]
    fn builder_clamps() {
        let c = ExtractionConfig::builder()
            .dpi(10)
            .concurrency(0)
            .temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 72);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn blank_sentinel_rejected() {
        let err = ExtractionConfig::builder()
            .unknown_sentinel("  ")
            .build()
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }

    #[test]
    fn negative_cost_rejected() {
        assert!(ExtractionConfig::builder()
            .cost_per_1k_tokens(-1.0)
            .build()
            .is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        assert!(ExtractionConfig::builder().api_timeout_secs(0).build().is_err());
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageSelection::First(2).to_indices(5), vec![0, 1]);
        assert_eq!(PageSelection::First(9).to_indices(2), vec![0, 1]);
        assert_eq!(PageSelection::Range(2, 4).to_indices(5), vec![1, 2, 3]);
        assert_eq!(PageSelection::Range(3, 10).to_indices(4), vec![2, 3]);
        assert_eq!(PageSelection::Set(vec![3, 1, 3, 9]).to_indices(5), vec![0, 2]);
        assert!(PageSelection::Range(4, 2).to_indices(5).is_empty());
    }

    #[test]
    fn merge_mode_serialises_snake_case() {
        let json = serde_json::to_string(&MergeMode::FirstWins).unwrap();
        assert_eq!(json, "\"first_wins\"");
    }
}
