//! Model interaction: invoke the model for one page and contain its failures.
//!
//! [`ModelInvoker`] is the only seam between the pipeline and a model. The
//! production implementation, [`LlmInvoker`], wraps any edgequake-llm
//! provider; tests and alternative backends (local OCR + text model, a cache
//! in front of the API) supply their own.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient and frequent under concurrent load.
//! Exponential backoff (`retry_backoff_ms * 2^(attempt - 1)`) spreads retries
//! out: with 500 ms base and 3 retries the waits are 500 ms → 1 s → 2 s.
//! Every attempt is bounded by `api_timeout_secs`; a timed-out attempt is
//! retried like any other transient failure. A permit from the shared
//! semaphore is held only while a call is in flight, never during backoff.

use crate::config::ExtractionConfig;
use crate::error::{InvokeError, PageError};
use crate::output::{Page, PageContent, PageOutcome, PageResult, TokenUsage};
use crate::pipeline::encode::to_image_data;
use crate::pipeline::parse::parse_response;
use crate::prompts::{page_text_message, IMAGE_PAGE_MESSAGE};
use crate::schema::FieldSchema;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Raw model answer plus the usage the model reported for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub usage: TokenUsage,
}

impl ModelReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: TokenUsage::default(),
        }
    }
}

/// Accepts a prompt plus one page and returns the model's raw text.
///
/// Implementations make exactly one outbound call per invocation and keep no
/// state between calls. The output is untrusted: it goes straight to the
/// response parser.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, prompt: &str, page: &Page) -> Result<ModelReply, InvokeError>;

    /// Short label for logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// [`ModelInvoker`] backed by an edgequake-llm provider.
///
/// Image pages are sent as a base64 attachment; text pages as a plain user
/// message. Either way the extraction prompt is the system message.
pub struct LlmInvoker {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    label: String,
}

impl LlmInvoker {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig, label: impl Into<String>) -> Self {
        Self {
            provider,
            options: build_options(config),
            label: label.into(),
        }
    }
}

#[async_trait]
impl ModelInvoker for LlmInvoker {
    async fn invoke(&self, prompt: &str, page: &Page) -> Result<ModelReply, InvokeError> {
        let user = match &page.content {
            PageContent::Image { bytes, mime_type } => {
                ChatMessage::user_with_images(IMAGE_PAGE_MESSAGE, vec![to_image_data(bytes, mime_type)])
            }
            PageContent::Text(text) => ChatMessage::user(page_text_message(text)),
        };
        let messages = vec![ChatMessage::system(prompt), user];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| InvokeError::Call(e.to_string()))?;

        Ok(ModelReply {
            text: response.content,
            usage: TokenUsage {
                input_tokens: response.prompt_tokens as u64,
                output_tokens: response.completion_tokens as u64,
            },
        })
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Extract the field map of a single page.
///
/// Always returns a `PageResult`: invocation errors, timeouts and
/// unparseable answers become [`PageOutcome::Failed`]
/// so one bad page never aborts its siblings. A parse failure is final; the
/// model answered, and asking again at temperature 0 rarely changes that.
pub async fn extract_page(
    invoker: &dyn ModelInvoker,
    limiter: &Semaphore,
    prompt: &str,
    page: &Page,
    schema: &FieldSchema,
    config: &ExtractionConfig,
) -> PageResult {
    let start = Instant::now();
    let page_num = page.number();
    let call_timeout = Duration::from_secs(config.api_timeout_secs);
    let mut usage = TokenUsage::default();
    let mut last_err: Option<PageError> = None;
    let mut attempts = 0u32;

    for attempt in 0..=config.max_retries {
        attempts = attempt;
        if attempt > 0 {
            let backoff = config.retry_backoff_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let reply = {
            let _permit = match limiter.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    last_err = Some(PageError::ModelCall {
                        page: page_num,
                        retries: attempt,
                        detail: "model call limiter closed".into(),
                    });
                    break;
                }
            };
            timeout(call_timeout, invoker.invoke(prompt, page)).await
        };

        match reply {
            Ok(Ok(reply)) => {
                usage += reply.usage;
                debug!(
                    "Page {}: {} input tokens, {} output tokens, {:?}",
                    page_num,
                    reply.usage.input_tokens,
                    reply.usage.output_tokens,
                    start.elapsed()
                );
                let outcome = parse_response(page_num, &reply.text, schema, &config.unknown_sentinel);
                return PageResult {
                    page_index: page.index,
                    outcome,
                    usage,
                    duration_ms: start.elapsed().as_millis() as u64,
                    retries: attempt,
                };
            }
            Ok(Err(e)) => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                let retryable = e.is_retryable();
                last_err = Some(PageError::ModelCall {
                    page: page_num,
                    retries: attempt,
                    detail: e.to_string(),
                });
                if !retryable {
                    break;
                }
            }
            Err(_) => {
                warn!(
                    "Page {}: attempt {} timed out after {}s",
                    page_num,
                    attempt + 1,
                    config.api_timeout_secs
                );
                last_err = Some(PageError::Timeout {
                    page: page_num,
                    secs: config.api_timeout_secs,
                });
            }
        }
    }

    let error = last_err.unwrap_or_else(|| PageError::ModelCall {
        page: page_num,
        retries: attempts,
        detail: "Unknown error".to_string(),
    });

    PageResult {
        page_index: page.index,
        outcome: PageOutcome::Failed { error },
        usage,
        duration_ms: start.elapsed().as_millis() as u64,
        retries: attempts,
    }
}
