//! Document-level entry points: split, extract every page, reconcile, persist.
//!
//! [`Extractor`] owns everything shared across the documents of a run: the
//! field schema, the prompt built from it, the model invoker and the
//! semaphore capping in-flight model calls. Build one and reuse it; every
//! document it processes draws from the same concurrency budget.

use crate::config::{ExtractionConfig, DEFAULT_MODEL};
use crate::error::ExtractError;
use crate::output::{CandidateRecord, Page, PageResult};
use crate::pipeline::input::{self, has_supported_extension, is_url};
use crate::pipeline::llm::{self, LlmInvoker, ModelInvoker};
use crate::pipeline::reconcile::Reconciler;
use crate::pipeline::split::{DocumentSplitter, FileSplitter, SplitDocument};
use crate::prompts::extraction_prompt;
use crate::schema::FieldSchema;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// A record together with the file it was persisted to.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub record: CandidateRecord,
    pub path: PathBuf,
}

/// Outcome of one input of a batch.
#[derive(Debug)]
pub struct BatchItem {
    pub input: String,
    pub result: Result<ExtractedDocument, ExtractError>,
}

/// Extracts candidate records from résumé documents.
#[derive(Clone)]
pub struct Extractor {
    schema: Arc<FieldSchema>,
    prompt: Arc<str>,
    invoker: Arc<dyn ModelInvoker>,
    splitter: Arc<dyn DocumentSplitter>,
    limiter: Arc<Semaphore>,
    config: ExtractionConfig,
}

impl Extractor {
    /// Extractor for the default résumé schema, with the model resolved
    /// from `config` and the environment.
    pub fn new(config: ExtractionConfig) -> Result<Self, ExtractError> {
        Self::with_schema(FieldSchema::resume(), config)
    }

    /// Extractor for a custom schema, with the model resolved from `config`
    /// and the environment.
    pub fn with_schema(schema: FieldSchema, config: ExtractionConfig) -> Result<Self, ExtractError> {
        let invoker = resolve_invoker(&config)?;
        Ok(Self::with_invoker(schema, invoker, config))
    }

    /// Extractor calling `invoker` directly. Never touches the environment.
    pub fn with_invoker(schema: FieldSchema, invoker: Arc<dyn ModelInvoker>, config: ExtractionConfig) -> Self {
        let prompt: Arc<str> = extraction_prompt(&schema, &config.unknown_sentinel).into();
        Self {
            schema: Arc::new(schema),
            prompt,
            invoker,
            splitter: Arc::new(FileSplitter),
            limiter: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
        }
    }

    /// Replace the document splitter.
    pub fn with_splitter(mut self, splitter: Arc<dyn DocumentSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// The system prompt sent with every page.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Extract the record for one document (local path or URL).
    ///
    /// # Errors
    /// Only for fatal, document-level problems: the input cannot be resolved
    /// or the document cannot be split into pages. Page failures are
    /// contained in the returned record.
    pub async fn extract_document(&self, input: &str) -> Result<CandidateRecord, ExtractError> {
        info!("Starting extraction: {}", input);
        let resolved = input::resolve_input(input, self.config.download_timeout_secs).await?;
        let document = resolved.document_name();
        let split = self.splitter.split(resolved.path(), &self.config).await?;
        Ok(self.extract_split(&document, split).await)
    }

    /// Extract the record for pages that were already split.
    pub async fn extract_pages(&self, document: &str, pages: Vec<Page>) -> CandidateRecord {
        let split = SplitDocument {
            pages,
            page_errors: Vec::new(),
        };
        self.extract_split(document, split).await
    }

    /// Extract one document and persist its record as `<out_dir>/<document>.json`.
    pub async fn extract_to_dir(
        &self,
        input: &str,
        out_dir: impl AsRef<Path>,
    ) -> Result<ExtractedDocument, ExtractError> {
        let record = self.extract_document(input).await?;
        let path = self.write_record(&record, out_dir.as_ref()).await?;
        Ok(ExtractedDocument { record, path })
    }

    /// Persist `record` as `<out_dir>/<document>.json`.
    ///
    /// Uses atomic write (unique temp file + rename) so readers never see a
    /// partial record. Concurrent writes to the same name each complete; the
    /// last rename wins.
    pub async fn write_record(&self, record: &CandidateRecord, out_dir: &Path) -> Result<PathBuf, ExtractError> {
        let path = out_dir.join(format!("{}.json", record.document));
        let json = record
            .to_persisted_json(&self.config.unknown_sentinel, self.config.unknown_as_null)
            .map_err(|e| ExtractError::Internal(format!("Failed to serialise record: {}", e)))?;

        let dir = out_dir.to_path_buf();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, json.as_bytes()))
            .await
            .map_err(|e| ExtractError::Internal(format!("Write task panicked: {}", e)))?
            .map_err(|source| ExtractError::OutputWriteFailed {
                path: path.clone(),
                source,
            })?;

        debug!("Wrote {}", path.display());
        Ok(path)
    }

    /// Extract and persist many inputs.
    ///
    /// Directories are expanded to their supported files, sorted by name.
    /// Up to `document_concurrency` documents run at once. One failed
    /// document never aborts the batch; items come back in input order.
    pub async fn extract_batch(&self, inputs: &[String], out_dir: impl AsRef<Path>) -> Vec<BatchItem> {
        let out_dir = out_dir.as_ref();
        let inputs = expand_inputs(inputs);
        info!("Batch of {} documents → {}", inputs.len(), out_dir.display());

        let mut items: Vec<(usize, BatchItem)> = stream::iter(inputs.into_iter().enumerate().map(|(i, input)| async move {
            let result = self.extract_to_dir(&input, out_dir).await;
            if let Err(ref e) = result {
                warn!("{}: {}", input, e);
            }
            (i, BatchItem { input, result })
        }))
        .buffer_unordered(self.config.document_concurrency.max(1))
        .collect()
        .await;

        items.sort_by_key(|(i, _)| *i);
        items.into_iter().map(|(_, item)| item).collect()
    }

    async fn extract_split(&self, document: &str, split: SplitDocument) -> CandidateRecord {
        let start = Instant::now();
        let total_pages = split.total_pages();
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_document_start(document, total_pages);
        }

        let mut results: Vec<PageResult> = split
            .page_errors
            .into_iter()
            .map(|e| {
                if let Some(cb) = cb {
                    cb.on_page_error(document, e.page(), total_pages, &e.to_string());
                }
                PageResult::failed(e.page().saturating_sub(1), e)
            })
            .collect();

        let extracted: Vec<PageResult> = stream::iter(split.pages.iter().map(|page| async move {
            if let Some(cb) = cb {
                cb.on_page_start(document, page.number(), total_pages);
            }
            let result = llm::extract_page(
                self.invoker.as_ref(),
                &self.limiter,
                &self.prompt,
                page,
                &self.schema,
                &self.config,
            )
            .await;
            if let Some(cb) = cb {
                match result.error() {
                    None => cb.on_page_complete(document, page.number(), total_pages, result.known_fields()),
                    Some(e) => cb.on_page_error(document, page.number(), total_pages, &e.to_string()),
                }
            }
            result
        }))
        .buffer_unordered(self.config.concurrency.max(1))
        .collect()
        .await;
        results.extend(extracted);

        let mut record =
            Reconciler::new(self.config.merge_mode, self.config.unknown_sentinel.as_str()).reconcile(document, &self.schema, &results);
        record.stats.estimated_cost_usd = self.config.cost_per_1k_tokens.map(|price| {
            (record.stats.total_input_tokens + record.stats.total_output_tokens) as f64 / 1000.0 * price
        });

        if record.is_total_failure() {
            warn!("{}: all {} pages failed", document, total_pages);
        }
        info!(
            "Extraction complete: {} ({}/{} fields, {}/{} pages, {}ms)",
            document,
            record.resolved_count(),
            self.schema.len(),
            record.stats.extracted_pages,
            total_pages,
            start.elapsed().as_millis()
        );
        if let Some(cb) = cb {
            cb.on_document_complete(document, record.resolved_count(), self.schema.len());
        }
        record
    }
}

/// Extract the record for one document with the default résumé schema.
pub async fn extract(input: impl AsRef<str>, config: &ExtractionConfig) -> Result<CandidateRecord, ExtractError> {
    Extractor::new(config.clone())?.extract_document(input.as_ref()).await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(input: impl AsRef<str>, config: &ExtractionConfig) -> Result<CandidateRecord, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input, config))
}

/// Expand directory inputs to their supported files, sorted by name.
///
/// URLs, files and unreadable paths are passed through unchanged; the
/// latter fail later with a proper error.
pub fn expand_inputs(inputs: &[String]) -> Vec<String> {
    let mut expanded = Vec::with_capacity(inputs.len());
    for input in inputs {
        let path = Path::new(input);
        if is_url(input) || !path.is_dir() {
            expanded.push(input.clone());
            continue;
        }
        match std::fs::read_dir(path) {
            Ok(entries) => {
                let mut files: Vec<PathBuf> = entries
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| p.is_file() && has_supported_extension(p))
                    .collect();
                files.sort();
                debug!("{}: {} supported files", input, files.len());
                expanded.extend(files.into_iter().map(|p| p.to_string_lossy().into_owned()));
            }
            Err(e) => {
                warn!("Cannot read directory {}: {}", input, e);
                expanded.push(input.clone());
            }
        }
    }
    expanded
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new().prefix(".").suffix(".json.tmp").tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| ExtractError::ProviderNotConfigured {
        provider: provider_name.to_string(),
        hint: format!("{e}"),
    })
}

/// Resolve the model invoker, from most-specific to least-specific.
///
/// 1. **Pre-built invoker** (`config.invoker`), used as-is.
/// 2. **Pre-built provider** (`config.provider`), wrapped in an [`LlmInvoker`].
/// 3. **Named provider + model** (`config.provider_name`), via
///    [`ProviderFactory::create_llm_provider`], which reads the matching API key.
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 5. **`OPENAI_API_KEY`** present → OpenAI, even when other keys are set.
/// 6. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_invoker(config: &ExtractionConfig) -> Result<Arc<dyn ModelInvoker>, ExtractError> {
    if let Some(ref invoker) = config.invoker {
        return Ok(Arc::clone(invoker));
    }

    let wrap = |provider: Arc<dyn LLMProvider>, label: String| -> Arc<dyn ModelInvoker> {
        info!("Using model provider: {}", label);
        Arc::new(LlmInvoker::new(provider, config, label))
    };

    if let Some(ref provider) = config.provider {
        return Ok(wrap(Arc::clone(provider), "provider".to_string()));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return Ok(wrap(create_provider(name, model)?, format!("{name}/{model}")));
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return Ok(wrap(create_provider(&prov, &env_model)?, format!("{prov}/{env_model}")));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return Ok(wrap(create_provider("openai", model)?, format!("openai/{model}")));
        }
    }

    let (llm_provider, _embedding) = ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
        provider: "auto".to_string(),
        hint: format!(
            "No LLM provider could be auto-detected from environment.\n\
            Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
            Error: {}",
            e
        ),
    })?;

    Ok(wrap(llm_provider, "auto".to_string()))
}
