//! CLI binary for resume2json.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs a batch, and reports per-document outcomes.

use anyhow::{Context, Result};
use clap::Parser;
use resume2json::{
    BatchItem, CandidateRecord, ExtractionConfig, ExtractionProgressCallback, ExtractionStrategy,
    Extractor, FieldSchema, MergeMode, PageSelection, ProgressCallback, RecordStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar counting pages across all documents,
/// plus a log line per page and per document. Pages and documents complete
/// out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-page wall-clock start times, keyed by (document, page).
    start_times: Mutex<HashMap<(String, usize), Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.set_message("opening documents…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, document: &str, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&(document.to_string(), page_num)))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        if errors > 0 {
            eprintln!("{} {} pages failed", cyan("⚠"), bold(&errors.to_string()));
        }
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_document_start(&self, document: &str, total_pages: usize) {
        self.bar.inc_length(total_pages as u64);
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(document),
            dim(&format!("{total_pages} pages"))
        ));
    }

    fn on_page_start(&self, document: &str, page_num: usize, _total: usize) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert((document.to_string(), page_num), Instant::now());
        }
        self.bar.set_message(format!("{document} p{page_num}"));
    }

    fn on_page_complete(&self, document: &str, page_num: usize, total: usize, known_fields: usize) {
        let secs = self.elapsed_secs(document, page_num);
        self.bar.println(format!(
            "  {} {} p{:>2}/{:<2}  {:<10}  {}",
            green("✓"),
            document,
            page_num,
            total,
            dim(&format!("{known_fields:>2} fields")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, document: &str, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(document, page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {} p{:>2}/{:<2}  {}  {}",
            red("✗"),
            document,
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One résumé → out/curriculo_ana.json
  resume2json curriculo_ana.pdf -o out

  # A whole folder, first-wins merge (single-form documents)
  resume2json ./candidatos --merge first -o out

  # Scanned PDFs through a text model: text layer, image fallback
  resume2json --strategy text cv.pdf

  # From a URL or Google Drive share link
  resume2json "https://drive.google.com/file/d/<id>/view" -o out

  # Custom schema, unknown fields as null, full records on stdout
  resume2json --schema campos.json --unknown-null --report cv.docx > report.json

SCHEMA FILE:
  A JSON object mapping field keys to extraction instructions, in the
  order the fields should appear in every record:
    { "nome": "Nome completo do candidato", "email": "E-mail de contato" }

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium
  RUST_LOG                Log filter (overrides -v / -q)

PDF input needs the pdfium shared library (libpdfium), either on the
system library path or named by PDFIUM_LIB_PATH.
"#;

/// Extract candidate profiles from résumés into JSON using LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "resume2json",
    version,
    about = "Extract candidate profiles from résumés (PDF, DOCX, images) into JSON using LLMs",
    long_about = "Extract structured candidate data from résumés (local files, folders, URLs) \
into one JSON record per document. Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and \
any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Résumé files, folders, or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Directory receiving one `<document>.json` per input.
    #[arg(short, long, env = "RESUME2JSON_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// How PDF pages reach the model: rendered images, or the text layer.
    #[arg(long, env = "RESUME2JSON_STRATEGY", value_enum, default_value = "vision")]
    strategy: StrategyArg,

    /// How values from several pages are merged.
    #[arg(long, env = "RESUME2JSON_MERGE", value_enum, default_value = "longest")]
    merge: MergeArg,

    /// JSON file with a custom field schema (see SCHEMA FILE below).
    #[arg(long, env = "RESUME2JSON_SCHEMA")]
    schema: Option<PathBuf>,

    /// Page selection: all, 5, 1-3, or 1,3,5.
    #[arg(long, env = "RESUME2JSON_PAGES", default_value = "all")]
    pages: String,

    /// Rendering DPI (72–400).
    #[arg(long, env = "RESUME2JSON_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Maximum concurrent model calls.
    #[arg(short, long, env = "RESUME2JSON_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Documents processed at once.
    #[arg(long, env = "RESUME2JSON_DOCUMENTS", default_value_t = 2)]
    documents: usize,

    /// Max model output tokens per page.
    #[arg(long, env = "RESUME2JSON_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "RESUME2JSON_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per page on model failure.
    #[arg(long, env = "RESUME2JSON_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "RESUME2JSON_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "RESUME2JSON_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "RESUME2JSON_PASSWORD")]
    password: Option<String>,

    /// Value written for fields that were not found.
    #[arg(long, env = "RESUME2JSON_UNKNOWN", default_value = resume2json::DEFAULT_UNKNOWN_SENTINEL)]
    unknown: String,

    /// Write unknown fields as JSON null instead of the --unknown text.
    #[arg(long, env = "RESUME2JSON_UNKNOWN_NULL")]
    unknown_null: bool,

    /// Price per 1 000 tokens, for a cost estimate in the summary.
    #[arg(long, env = "RESUME2JSON_COST_PER_1K")]
    cost_per_1k: Option<f64>,

    /// Print the full records (sources, stats, failures) as JSON to stdout.
    #[arg(long)]
    report: bool,

    /// Disable progress bar.
    #[arg(long, env = "RESUME2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RESUME2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "RESUME2JSON_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Vision,
    Text,
}

impl From<StrategyArg> for ExtractionStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Vision => ExtractionStrategy::Vision,
            StrategyArg::Text => ExtractionStrategy::Text,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MergeArg {
    Longest,
    First,
}

impl From<MergeArg> for MergeMode {
    fn from(v: MergeArg) -> Self {
        match v {
            MergeArg::Longest => MergeMode::LongestWins,
            MergeArg::First => MergeMode::FirstWins,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build extractor ──────────────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(&cli, progress.clone().map(|cb| cb as ProgressCallback))?;

    let schema = match cli.schema {
        Some(ref path) => FieldSchema::from_json_file(path)
            .with_context(|| format!("Failed to load schema from {:?}", path))?,
        None => FieldSchema::resume(),
    };

    let extractor = Extractor::with_schema(schema, config).context("Failed to set up the model provider")?;

    // ── Run batch ────────────────────────────────────────────────────────
    let start = Instant::now();
    let items = extractor.extract_batch(&cli.inputs, &cli.output_dir).await;
    if let Some(ref cb) = progress {
        cb.finish();
    }

    if cli.report {
        let records: Vec<&CandidateRecord> = items
            .iter()
            .filter_map(|item| item.result.as_ref().ok().map(|d| &d.record))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&records).context("Failed to serialise report")?
        );
    }

    let failed = items.iter().filter(|i| i.result.is_err()).count();
    if !cli.quiet {
        print_summary(&items, extractor.schema().len(), cli.cost_per_1k.is_some(), start);
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} documents failed", items.len());
    }
    Ok(())
}

fn print_summary(items: &[BatchItem], total_fields: usize, show_cost: bool, start: Instant) {
    let mut tokens_in = 0u64;
    let mut tokens_out = 0u64;
    let mut cost = 0.0f64;

    for item in items {
        match &item.result {
            Ok(done) => {
                let r = &done.record;
                tokens_in += r.stats.total_input_tokens;
                tokens_out += r.stats.total_output_tokens;
                cost += r.stats.estimated_cost_usd.unwrap_or(0.0);

                let mark = match r.status {
                    RecordStatus::Complete => green("✔"),
                    RecordStatus::Partial => cyan("⚠"),
                    RecordStatus::AllPagesFailed | RecordStatus::NoPages => red("✘"),
                };
                let note = match r.status {
                    RecordStatus::Partial => format!("  ({} pages failed)", r.stats.failed_pages),
                    RecordStatus::AllPagesFailed => "  (all pages failed)".to_string(),
                    RecordStatus::NoPages => "  (no pages)".to_string(),
                    RecordStatus::Complete => String::new(),
                };
                eprintln!(
                    "{} {}  {}/{} fields{}  →  {}",
                    mark,
                    bold(&r.document),
                    r.resolved_count(),
                    total_fields,
                    red(&note),
                    done.path.display()
                );
            }
            Err(e) => eprintln!("{} {}  {}", red("✘"), bold(&item.input), red(&e.to_string())),
        }
    }

    let ok = items.iter().filter(|i| i.result.is_ok()).count();
    eprintln!(
        "{}/{} documents in {:.1}s   {} tokens in  /  {} tokens out",
        ok,
        items.len(),
        start.elapsed().as_secs_f64(),
        dim(&tokens_in.to_string()),
        dim(&tokens_out.to_string()),
    );
    if show_cost {
        eprintln!("   estimated cost: {}", dim(&format!("${cost:.4}")));
    }
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let pages = parse_pages(&cli.pages)?;

    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .document_concurrency(cli.documents)
        .pages(pages)
        .strategy(cli.strategy.into())
        .merge_mode(cli.merge.into())
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .unknown_sentinel(cli.unknown.clone())
        .unknown_as_null(cli.unknown_null);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(price) = cli.cost_per_1k {
        builder = builder.cost_per_1k_tokens(price);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "1-3"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5" or a single page: "5"
    let pages: Vec<usize> = s
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid page number: '{}'", p.trim()))
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some(&p) = pages.iter().find(|&&p| p < 1) {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
    }

    Ok(PageSelection::Set(pages))
}
