//! Integration tests for the extraction pipeline.
//!
//! Every test drives [`Extractor`] through a scripted [`ModelInvoker`], so no
//! network access, API key or pdfium library is needed. Inputs are text,
//! DOCX and image files created in a temp dir.

use async_trait::async_trait;
use resume2json::{
    ExtractError, ExtractionConfig, ExtractionProgressCallback, Extractor, FieldSchema, InvokeError,
    MergeMode, ModelInvoker, ModelReply, Page, PageContent, PageError, RecordStatus, TokenUsage,
};
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// One scripted answer.
#[derive(Clone)]
enum Step {
    Reply(String),
    Fail(&'static str),
    Delay(u64, String),
    Hang,
}

fn reply(s: &str) -> Step {
    Step::Reply(s.to_string())
}

/// Answers by page text. Pages without a script get `{"nome": "<text>"}`.
#[derive(Default)]
struct ScriptedInvoker {
    script: Mutex<HashMap<String, VecDeque<Step>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedInvoker {
    fn new() -> Self {
        Self::default()
    }

    fn on(self, page_text: &str, steps: Vec<Step>) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(page_text.to_string(), steps.into_iter().collect());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(&self, prompt: &str, page: &Page) -> Result<ModelReply, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let key = match &page.content {
            PageContent::Text(t) => t.trim().to_string(),
            PageContent::Image { .. } => "<image>".to_string(),
        };
        let step = self
            .script
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|steps| steps.pop_front())
            .unwrap_or_else(|| Step::Reply(serde_json::json!({ "nome": key }).to_string()));

        let result = match step {
            Step::Reply(text) => Ok(text),
            Step::Fail(msg) => Err(InvokeError::Call(msg.to_string())),
            Step::Delay(ms, text) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(text)
            }
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result.map(|text| ModelReply {
            text,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 10,
            },
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn schema() -> FieldSchema {
    FieldSchema::new([
        ("nome", "Nome completo do candidato"),
        ("email", "E-mail"),
        ("cidade", "Cidade onde mora"),
    ])
    .unwrap()
}

fn base_config() -> resume2json::ExtractionConfigBuilder {
    ExtractionConfig::builder().retry_backoff_ms(1).max_retries(2)
}

fn extractor(invoker: Arc<ScriptedInvoker>, config: ExtractionConfig) -> Extractor {
    Extractor::with_invoker(schema(), invoker, config)
}

fn text_pages(texts: &[&str]) -> Vec<Page> {
    texts.iter().enumerate().map(|(i, t)| Page::text(i, *t)).collect()
}

fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
        .collect();
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
        .unwrap();
    write!(writer, "<w:document><w:body>{body}</w:body></w:document>").unwrap();
    writer.finish().unwrap().into_inner()
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// ── Multi-page merge ─────────────────────────────────────────────────────────

#[tokio::test]
async fn longest_wins_prefers_most_complete_value() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .on("p1", vec![reply(r#"{"nome": "Ana", "cidade": "Natal"}"#)])
            .on("p2", vec![reply(r#"{"nome": "Ana Paula Souza", "email": "ana@x.com"}"#)]),
    );
    let config = base_config().merge_mode(MergeMode::LongestWins).build().unwrap();
    let record = extractor(invoker, config)
        .extract_pages("cv", text_pages(&["p1", "p2"]))
        .await;

    assert_eq!(record.value("nome"), Some("Ana Paula Souza"));
    assert_eq!(record.value("email"), Some("ana@x.com"));
    assert_eq!(record.value("cidade"), Some("Natal"));
    assert_eq!(record.sources["nome"], 2);
    assert_eq!(record.sources["cidade"], 1);
    assert_eq!(record.status, RecordStatus::Complete);
    assert_eq!(record.stats.contributing_pages, 2);
}

#[tokio::test]
async fn first_wins_prefers_earliest_page() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .on("p1", vec![reply(r#"{"nome": "Ana"}"#)])
            .on("p2", vec![reply(r#"{"nome": "Ana Paula Souza"}"#)]),
    );
    let config = base_config().merge_mode(MergeMode::FirstWins).build().unwrap();
    let record = extractor(invoker, config)
        .extract_pages("cv", text_pages(&["p1", "p2"]))
        .await;

    assert_eq!(record.value("nome"), Some("Ana"));
    assert_eq!(record.merge_mode, MergeMode::FirstWins);
}

#[tokio::test]
async fn completion_order_does_not_change_the_record() {
    // Page 1 answers last; first-wins must still pick it.
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .on("p1", vec![Step::Delay(80, r#"{"nome": "Ana"}"#.into())])
            .on("p2", vec![reply(r#"{"nome": "Bia"}"#)])
            .on("p3", vec![reply(r#"{"nome": "Carla"}"#)]),
    );
    let config = base_config().merge_mode(MergeMode::FirstWins).concurrency(3).build().unwrap();
    let record = extractor(invoker, config)
        .extract_pages("cv", text_pages(&["p1", "p2", "p3"]))
        .await;

    assert_eq!(record.value("nome"), Some("Ana"));
    assert_eq!(record.sources["nome"], 1);
}

#[tokio::test]
async fn record_has_exactly_the_schema_keys() {
    let invoker = Arc::new(ScriptedInvoker::new().on(
        "p1",
        vec![reply(r#"{"nome": "Ana", "hobby": "xadrez", "idade": "30"}"#)],
    ));
    let record = extractor(invoker, base_config().build().unwrap())
        .extract_pages("cv", text_pages(&["p1"]))
        .await;

    let keys: Vec<&str> = record.fields.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["nome", "email", "cidade"]);
}

// ── Failure containment ──────────────────────────────────────────────────────

#[tokio::test]
async fn unparseable_page_is_contained_and_kept_for_diagnosis() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .on("p1", vec![reply("```json\n{\"nome\": \"Ana\"}\n```")])
            .on("p2", vec![reply("Desculpe, não consigo.")]),
    );
    let record = extractor(invoker.clone(), base_config().build().unwrap())
        .extract_pages("cv", text_pages(&["p1", "p2"]))
        .await;

    assert_eq!(record.value("nome"), Some("Ana"));
    assert_eq!(record.status, RecordStatus::Partial);
    assert_eq!(record.failures.len(), 1);
    assert_eq!(record.failures[0].page, 2);
    assert_eq!(
        record.failures[0].raw_response.as_deref(),
        Some("Desculpe, não consigo.")
    );
    // Parse failures are not retried.
    assert_eq!(invoker.calls(), 2);
}

#[tokio::test]
async fn all_pages_failed_yields_all_unknown_record() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .on("p1", vec![Step::Fail("HTTP 401"); 3])
            .on("p2", vec![reply("no json here")]),
    );
    let config = base_config().build().unwrap();
    let ex = extractor(invoker, config);
    let record = ex.extract_pages("cv", text_pages(&["p1", "p2"])).await;

    assert!(record.is_total_failure());
    assert_eq!(record.status, RecordStatus::AllPagesFailed);
    assert!(record.fields.values().all(Option::is_none));
    assert_eq!(record.failures.len(), 2);

    let json = record.to_persisted_json("Não informado", false).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    for key in ["nome", "email", "cidade"] {
        assert_eq!(value[key], "Não informado");
    }
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let invoker = Arc::new(ScriptedInvoker::new().on(
        "p1",
        vec![
            Step::Fail("HTTP 429"),
            Step::Fail("HTTP 503"),
            reply(r#"{"email": "ana@x.com"}"#),
        ],
    ));
    let record = extractor(invoker.clone(), base_config().max_retries(3).build().unwrap())
        .extract_pages("cv", text_pages(&["p1"]))
        .await;

    assert_eq!(record.value("email"), Some("ana@x.com"));
    assert_eq!(invoker.calls(), 3);
    assert_eq!(record.stats.total_input_tokens, 100);
}

#[tokio::test]
async fn hung_call_times_out_without_blocking_siblings() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .on("p1", vec![Step::Hang])
            .on("p2", vec![reply(r#"{"cidade": "Belém"}"#)]),
    );
    let config = base_config().max_retries(0).api_timeout_secs(1).build().unwrap();
    let record = extractor(invoker, config)
        .extract_pages("cv", text_pages(&["p1", "p2"]))
        .await;

    assert_eq!(record.value("cidade"), Some("Belém"));
    assert_eq!(record.failures.len(), 1);
    assert!(record.failures[0].reason.contains("timed out"));
}

#[tokio::test]
async fn concurrency_cap_is_respected() {
    let mut invoker = ScriptedInvoker::new();
    let texts: Vec<String> = (1..=6).map(|i| format!("p{i}")).collect();
    for t in &texts {
        invoker = invoker.on(t, vec![Step::Delay(30, r#"{"nome": "Ana"}"#.into())]);
    }
    let invoker = Arc::new(invoker);
    let config = base_config().concurrency(2).build().unwrap();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    extractor(invoker.clone(), config)
        .extract_pages("cv", text_pages(&refs))
        .await;

    assert_eq!(invoker.calls(), 6);
    assert!(invoker.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn reconciling_twice_gives_identical_records() {
    let make = || {
        Arc::new(
            ScriptedInvoker::new()
                .on("p1", vec![reply(r#"{"nome": "Ana"}"#)])
                .on("p2", vec![reply("garbage")]),
        )
    };
    let config = base_config().build().unwrap();
    let a = extractor(make(), config.clone())
        .extract_pages("cv", text_pages(&["p1", "p2"]))
        .await;
    let b = extractor(make(), config)
        .extract_pages("cv", text_pages(&["p1", "p2"]))
        .await;
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

// ── Prompt ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_page_gets_the_same_schema_prompt() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let config = base_config().unknown_sentinel("desconhecido").build().unwrap();
    let ex = extractor(invoker.clone(), config);
    ex.extract_pages("cv", text_pages(&["p1", "p2"])).await;

    let prompts = invoker.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0], prompts[1]);
    assert_eq!(prompts[0], ex.prompt());
    for key in ["nome", "email", "cidade"] {
        assert!(prompts[0].contains(&format!("\"{key}\"")));
    }
    assert!(prompts[0].contains("desconhecido"));
}

// ── Documents and persistence ────────────────────────────────────────────────

#[tokio::test]
async fn text_document_is_persisted_in_schema_order() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cv_joao.txt");
    std::fs::write(&input, "João Araújo").unwrap();
    let out = dir.path().join("out");

    let invoker = Arc::new(ScriptedInvoker::new().on(
        "João Araújo",
        vec![reply(r#"{"cidade": "São Luís", "nome": "João Araújo"}"#)],
    ));
    let done = extractor(invoker, base_config().build().unwrap())
        .extract_to_dir(input.to_str().unwrap(), &out)
        .await
        .unwrap();

    assert_eq!(done.path, out.join("cv_joao.json"));
    let raw = std::fs::read_to_string(&done.path).unwrap();
    assert!(raw.contains("João Araújo"), "diacritics must not be escaped: {raw}");
    let nome = raw.find("\"nome\"").unwrap();
    let email = raw.find("\"email\"").unwrap();
    let cidade = raw.find("\"cidade\"").unwrap();
    assert!(nome < email && email < cidade);

    let json = read_json(&done.path);
    assert_eq!(json["email"], "Não informado");
    assert_eq!(json.as_object().unwrap().len(), 3);
    assert!(!out.join("cv_joao.json.tmp").exists());
}

#[tokio::test]
async fn unknown_fields_can_be_persisted_as_null() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cv.txt");
    std::fs::write(&input, "Ana").unwrap();

    let invoker = Arc::new(ScriptedInvoker::new());
    let config = base_config().unknown_as_null(true).build().unwrap();
    let done = extractor(invoker, config)
        .extract_to_dir(input.to_str().unwrap(), dir.path())
        .await
        .unwrap();

    let json = read_json(&done.path);
    assert_eq!(json["nome"], "Ana");
    assert!(json["email"].is_null());
}

#[tokio::test]
async fn docx_document_becomes_one_text_page() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cv_ana.docx");
    std::fs::write(&input, docx_bytes(&["Ana Paula Souza", "ana@x.com"])).unwrap();

    let invoker = Arc::new(ScriptedInvoker::new().on(
        "Ana Paula Souza\nana@x.com",
        vec![reply(r#"{"nome": "Ana Paula Souza", "email": "ana@x.com"}"#)],
    ));
    let record = extractor(invoker.clone(), base_config().build().unwrap())
        .extract_document(input.to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(record.document, "cv_ana");
    assert_eq!(record.value("email"), Some("ana@x.com"));
    assert_eq!(record.stats.total_pages, 1);
    assert_eq!(invoker.calls(), 1);
}

#[tokio::test]
async fn image_document_is_sent_as_image() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scan.png");
    image::DynamicImage::ImageRgb8(image::RgbImage::new(16, 16))
        .save(&input)
        .unwrap();

    let invoker = Arc::new(ScriptedInvoker::new().on("<image>", vec![reply(r#"{"nome": "Ana"}"#)]));
    let record = extractor(invoker, base_config().build().unwrap())
        .extract_document(input.to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(record.value("nome"), Some("Ana"));
}

#[tokio::test]
async fn empty_document_yields_all_unknown_record() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("vazio.txt");
    std::fs::write(&input, "   \n").unwrap();

    let invoker = Arc::new(ScriptedInvoker::new());
    let done = extractor(invoker.clone(), base_config().build().unwrap())
        .extract_to_dir(input.to_str().unwrap(), dir.path())
        .await
        .unwrap();

    assert_eq!(done.record.status, RecordStatus::NoPages);
    assert!(!done.record.is_total_failure());
    assert!(done.record.fields.values().all(Option::is_none));
    assert_eq!(invoker.calls(), 0);
    assert!(done.path.exists());
}

#[tokio::test]
async fn unsupported_document_is_a_fatal_split_failure() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("cv.odt");
    std::fs::write(&input, "not a résumé format we read").unwrap();

    let err = extractor(Arc::new(ScriptedInvoker::new()), base_config().build().unwrap())
        .extract_to_dir(input.to_str().unwrap(), dir.path())
        .await
        .unwrap_err();

    assert!(err.is_split_failure());
    assert!(!dir.path().join("cv.json").exists());
}

#[tokio::test]
async fn batch_continues_past_failed_documents() {
    let dir = tempfile::tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    std::fs::create_dir(&inbox).unwrap();
    std::fs::write(inbox.join("b_bia.txt"), "Bia").unwrap();
    std::fs::write(inbox.join("a_ana.docx"), docx_bytes(&["Ana"])).unwrap();
    std::fs::write(inbox.join("c_bad.docx"), "not really a docx").unwrap();
    std::fs::write(inbox.join("notes.odt"), "ignored").unwrap();
    let out = dir.path().join("out");

    let invoker = Arc::new(ScriptedInvoker::new());
    let config = base_config().document_concurrency(2).build().unwrap();
    let inputs = vec![
        inbox.to_string_lossy().into_owned(),
        dir.path().join("missing.txt").to_string_lossy().into_owned(),
    ];
    let items = extractor(invoker, config).extract_batch(&inputs, &out).await;

    let names: Vec<String> = items
        .iter()
        .map(|i| Path::new(&i.input).file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a_ana.docx", "b_bia.txt", "c_bad.docx", "missing.txt"]);

    assert_eq!(items[0].result.as_ref().unwrap().record.value("nome"), Some("Ana"));
    assert_eq!(items[1].result.as_ref().unwrap().record.value("nome"), Some("Bia"));
    assert!(items[2].result.is_err());
    assert!(matches!(
        items[3].result,
        Err(ExtractError::FileNotFound { .. })
    ));

    assert_eq!(read_json(&out.join("a_ana.json"))["nome"], "Ana");
    assert_eq!(read_json(&out.join("b_bia.json"))["nome"], "Bia");
    assert!(!out.join("c_bad.json").exists());
}

#[tokio::test]
async fn batch_with_colliding_names_writes_every_record() {
    let dir = tempfile::tempdir().unwrap();
    let names = ["Ana", "Bia", "Carla", "Dora"];
    let inputs: Vec<String> = names
        .iter()
        .map(|name| {
            let sub = dir.path().join(name.to_lowercase());
            std::fs::create_dir(&sub).unwrap();
            let input = sub.join("cv.txt");
            std::fs::write(&input, name).unwrap();
            input.to_string_lossy().into_owned()
        })
        .collect();
    let out = dir.path().join("out");

    let config = base_config().document_concurrency(4).build().unwrap();
    let ex = extractor(Arc::new(ScriptedInvoker::new()), config);
    for _ in 0..25 {
        let items = ex.extract_batch(&inputs, &out).await;
        for item in &items {
            assert!(item.result.is_ok(), "{}: {:?}", item.input, item.result);
        }
        let written = read_json(&out.join("cv.json"));
        assert!(names.iter().any(|n| written["nome"] == *n), "got {written}");
    }

    let leftovers: Vec<_> = std::fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|n| n != "cv.json")
        .collect();
    assert!(leftovers.is_empty(), "stray files: {leftovers:?}");
}

// ── Progress events ──────────────────────────────────────────────────────────

#[derive(Default)]
struct CountingCallback {
    documents: AtomicUsize,
    pages_ok: AtomicUsize,
    pages_failed: AtomicUsize,
    resolved: AtomicUsize,
}

impl ExtractionProgressCallback for CountingCallback {
    fn on_document_start(&self, _document: &str, _total_pages: usize) {
        self.documents.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_complete(&self, _document: &str, _page: usize, _total: usize, _fields: usize) {
        self.pages_ok.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_error(&self, _document: &str, _page: usize, _total: usize, _error: &str) {
        self.pages_failed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_document_complete(&self, _document: &str, resolved: usize, _total: usize) {
        self.resolved.store(resolved, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_page() {
    let cb = Arc::new(CountingCallback::default());
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .on("p1", vec![reply(r#"{"nome": "Ana", "cidade": "Natal"}"#)])
            .on("p2", vec![reply("?")]),
    );
    let config = base_config().progress_callback(cb.clone()).build().unwrap();
    extractor(invoker, config)
        .extract_pages("cv", text_pages(&["p1", "p2"]))
        .await;

    assert_eq!(cb.documents.load(Ordering::SeqCst), 1);
    assert_eq!(cb.pages_ok.load(Ordering::SeqCst), 1);
    assert_eq!(cb.pages_failed.load(Ordering::SeqCst), 1);
    assert_eq!(cb.resolved.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cost_estimate_follows_token_usage() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let config = base_config().cost_per_1k_tokens(0.02).build().unwrap();
    let record = extractor(invoker, config)
        .extract_pages("cv", text_pages(&["p1", "p2"]))
        .await;

    // 2 pages × (100 in + 10 out) tokens.
    let cost = record.stats.estimated_cost_usd.unwrap();
    assert!((cost - 0.0044).abs() < 1e-9, "got {cost}");
}

#[test]
fn page_error_is_serialisable_for_reports() {
    let e = PageError::Timeout { page: 2, secs: 60 };
    let json = serde_json::to_string(&e).unwrap();
    assert!(json.contains("Timeout"));
}

#[test]
fn extractor_is_usable_from_sync_code() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let ex = extractor(invoker, base_config().build().unwrap());
    let record = tokio_test::block_on(ex.extract_pages("cv", text_pages(&["Ana"])));
    assert_eq!(record.value("nome"), Some("Ana"));
}
