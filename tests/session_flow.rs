//! Workflow tests for `ExtractionSession`.
//!
//! A canned `ChatBackend` and an in-memory `PdfBackend` stand in for the
//! remote API and pdfium, so these run without network access or a pdfium
//! library.

use aide_extract::pipeline::request::{ContentPart, MessageContent};
use aide_extract::session::{keys, load_form};
use aide_extract::{
    AideError, ApiConfig, CapabilityMap, ChatBackend, CodingForm, DocumentSource,
    ExtractionRequest, ExtractionSession, FileSessionStore, MemorySessionStore, PdfBackend,
    ProcessingMode, PromptState, RenderState, ResponseEntry, SessionStore, ViewerConfig,
};
use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ── Test doubles ─────────────────────────────────────────────────────────────

const TWO_ENTRIES: &str = r#"{"responses":[{"prompt":"Sample size","response":"120","source":"N=120","page":"3"},{"prompt":"Country","response":"Not found","source":"","page":"N/A"}]}"#;

/// Replies with a fixed body and keeps every request it sees.
struct StubChat {
    reply: Result<String, u16>,
    seen: Mutex<Vec<ExtractionRequest>>,
}

impl StubChat {
    fn replying(body: &str) -> Self {
        Self {
            reply: Ok(body.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn failing(status: u16) -> Self {
        Self {
            reply: Err(status),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn last_request(&self) -> ExtractionRequest {
        self.seen.lock().unwrap().last().cloned().expect("no request sent")
    }
}

#[async_trait]
impl ChatBackend for StubChat {
    async fn complete(&self, request: &ExtractionRequest) -> Result<String, AideError> {
        self.seen.lock().unwrap().push(request.clone());
        match &self.reply {
            Ok(body) => Ok(body.clone()),
            Err(status) => Err(AideError::RemoteStatus {
                status: *status,
                message: "Invalid API key".into(),
            }),
        }
    }
}

/// Fixed-size blank pages with "page N" text.
struct FakePdf {
    pages: usize,
    render_fails: bool,
    text_fails: bool,
}

impl FakePdf {
    fn healthy(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            render_fails: false,
            text_fails: false,
        })
    }
}

impl PdfBackend for FakePdf {
    fn page_count(&self, _doc: &DocumentSource) -> Result<usize, AideError> {
        Ok(self.pages)
    }

    fn render_page(
        &self,
        doc: &DocumentSource,
        _index: usize,
        _scale: f32,
        _max_pixels: u32,
    ) -> Result<DynamicImage, AideError> {
        if self.render_fails {
            return Err(AideError::RenderFailed {
                name: doc.name().into(),
                detail: "corrupt xref".into(),
            });
        }
        Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            8,
            8,
            Rgba([255, 255, 255, 255]),
        )))
    }

    fn page_text(&self, doc: &DocumentSource, index: usize) -> Result<String, AideError> {
        if self.text_fails {
            return Err(AideError::TextExtractionFailed {
                name: doc.name().into(),
                detail: "no text layer".into(),
            });
        }
        Ok(format!("page {} of the trial report", index + 1))
    }
}

/// Memory store whose writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: MemorySessionStore,
    fail: Arc<AtomicBool>,
}

impl SessionStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>, AideError> {
        self.inner.get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), AideError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AideError::OutputWriteFailed {
                path: "session".into(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), AideError> {
        self.inner.remove(key)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// `RUST_LOG=aide_extract=debug cargo test --test session_flow` shows the
/// session's log lines.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn api(model: &str) -> ApiConfig {
    ApiConfig::builder()
        .endpoint("https://openrouter.ai/api/v1/chat/completions")
        .api_key("sk-test")
        .model(model)
        .build()
        .unwrap()
}

fn pdf(name: &str) -> DocumentSource {
    DocumentSource::from_bytes(name, b"%PDF-1.7\n%fake".to_vec()).unwrap()
}

fn form() -> CodingForm {
    CodingForm::with_headers(["Sample size", "Country"]).unwrap()
}

fn caps() -> CapabilityMap {
    let mut m = CapabilityMap::new();
    m.insert("vision/model".into(), vec!["text".into(), "file".into()]);
    m.insert("text/model".into(), vec!["text".into()]);
    m
}

fn session_with<S: SessionStore>(store: S, backend: Arc<FakePdf>) -> ExtractionSession<S> {
    init_tracing();
    let mut s = ExtractionSession::open(store, backend, ViewerConfig::default()).unwrap();
    s.import_form(form()).unwrap();
    s
}

async fn loaded_session() -> ExtractionSession<MemorySessionStore> {
    let mut s = session_with(MemorySessionStore::new(), FakePdf::healthy(3));
    let status = s.load_document(pdf("trial_01.pdf")).await;
    assert_eq!(status.page_count, 3);
    s
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn analyze_record_and_advance() {
    let mut s = loaded_session().await;
    let chat = StubChat::replying(TWO_ENTRIES);

    let warning = s.analyze(&chat, &api("text/model")).await.unwrap();
    assert!(warning.is_none());
    assert_eq!(s.entry(0).unwrap(), &ResponseEntry::new("120", "N=120", "3"));
    assert_eq!(s.entry(1).unwrap().response, "Not found");

    s.record(0).unwrap();
    s.record(1).unwrap();
    let f = s.form().unwrap();
    assert_eq!(f.row_count(), 1);
    assert_eq!(f.cell(0, "Sample size"), Some("120"));
    assert_eq!(f.cell(0, "Country"), Some("Not found"));
    assert_eq!(load_form(s.store()).unwrap().as_ref(), s.form());

    s.next_document().unwrap();
    assert_eq!(s.form().unwrap().row_count(), 2);
    assert_eq!(s.lifecycle().recorded_count(), 0);
    assert!(s.document().is_none());
    assert!(matches!(s.viewer().state(), RenderState::Idle));
    assert_eq!(s.entry(0).unwrap(), &ResponseEntry::default());

    // The next document writes into the new last row.
    s.load_document(pdf("trial_02.pdf")).await;
    s.analyze(&chat, &api("text/model")).await.unwrap();
    s.edit_response(0, "85").unwrap();
    s.record(0).unwrap();
    let f = s.form().unwrap();
    assert_eq!(f.cell(0, "Sample size"), Some("120"));
    assert_eq!(f.cell(1, "Sample size"), Some("85"));
}

#[tokio::test]
async fn re_record_overwrites_without_history() {
    let mut s = loaded_session().await;
    s.analyze(&StubChat::replying(TWO_ENTRIES), &api("text/model"))
        .await
        .unwrap();
    s.record(0).unwrap();
    assert!(matches!(s.edit_response(0, "x"), Err(AideError::PromptLocked { .. })));

    s.re_record(0).unwrap();
    assert_eq!(s.lifecycle().state(0).unwrap(), PromptState::Draft);
    assert_eq!(s.form().unwrap().cell(0, "Sample size"), Some("120"));

    s.edit_response(0, "118").unwrap();
    s.record(0).unwrap();
    assert_eq!(s.form().unwrap().cell(0, "Sample size"), Some("118"));
    assert_eq!(s.form().unwrap().row_count(), 1);
}

#[tokio::test]
async fn text_mode_sends_extracted_text() {
    let mut s = loaded_session().await;
    let chat = StubChat::replying(TWO_ENTRIES);
    s.set_capabilities(caps()).unwrap();
    s.analyze(&chat, &api("text/model")).await.unwrap();

    assert_eq!(s.mode(), ProcessingMode::TextOnly);
    let req = chat.last_request();
    let user = req.messages[1].content.text();
    assert!(user.contains("page 1 of the trial report\n\npage 2 of the trial report"));
    assert!(user.contains("1. Sample size\n2. Country"));
}

#[tokio::test]
async fn capable_model_gets_the_pdf_attached() {
    let mut s = loaded_session().await;
    let chat = StubChat::replying(TWO_ENTRIES);
    s.set_capabilities(caps()).unwrap();
    s.analyze(&chat, &api("vision/model")).await.unwrap();

    assert_eq!(s.mode(), ProcessingMode::RichContent);
    let req = chat.last_request();
    let MessageContent::Parts(parts) = &req.messages[1].content else {
        panic!("expected a multi-part user message");
    };
    assert!(parts.iter().any(|p| matches!(
        p,
        ContentPart::File { file } if file.filename == "trial_01.pdf"
            && file.file_data.starts_with("data:application/pdf;base64,")
    )));
}

#[tokio::test]
async fn manual_mode_set_before_first_analysis_is_kept() {
    let mut s = loaded_session().await;
    let chat = StubChat::replying(TWO_ENTRIES);
    s.set_capabilities(caps()).unwrap();

    s.set_mode(ProcessingMode::RichContent);
    s.analyze(&chat, &api("text/model")).await.unwrap();
    assert_eq!(s.mode(), ProcessingMode::RichContent);
    assert!(matches!(
        chat.last_request().messages[1].content,
        MessageContent::Parts(_)
    ));

    s.analyze(&chat, &api("text/model")).await.unwrap();
    assert_eq!(s.mode(), ProcessingMode::RichContent);

    // A new document starts from the resolver again.
    s.next_document().unwrap();
    s.load_document(pdf("trial_02.pdf")).await;
    s.analyze(&chat, &api("text/model")).await.unwrap();
    assert_eq!(s.mode(), ProcessingMode::TextOnly);
}

#[tokio::test]
async fn blank_rows_survive_export_and_reimport() {
    use aide_extract::form::export::{to_delimited, to_xlsx};
    use aide_extract::form::import::{load_bytes, TabularFormat};

    let mut s = loaded_session().await;
    // Nothing recorded for the first document.
    s.next_document().unwrap();
    s.next_document().unwrap();
    s.load_document(pdf("trial_02.pdf")).await;
    s.analyze(&StubChat::replying(TWO_ENTRIES), &api("text/model"))
        .await
        .unwrap();
    s.record(1).unwrap();
    s.next_document().unwrap();
    let form = s.form().unwrap().clone();
    assert_eq!(form.row_count(), 3);

    let csv = to_delimited(&form, b',').unwrap();
    let xlsx = to_xlsx(&form).unwrap();
    for back in [
        load_bytes(csv.as_bytes(), TabularFormat::Delimited(b','), "form.csv").unwrap(),
        load_bytes(&xlsx, TabularFormat::Workbook, "form.xlsx").unwrap(),
    ] {
        assert_eq!(back.rows(), form.rows());

        // Recording after re-import still lands in the last row.
        s.import_form(back).unwrap();
        s.load_document(pdf("trial_03.pdf")).await;
        s.analyze(&StubChat::replying(TWO_ENTRIES), &api("text/model"))
            .await
            .unwrap();
        s.record(0).unwrap();
        let f = s.form().unwrap();
        assert_eq!(f.row_count(), 3);
        assert_eq!(f.cell(2, "Sample size"), Some("120"));
        assert_eq!(f.cell(1, "Country"), Some("Not found"));
        assert_eq!(f.cell(0, "Sample size"), Some(""));
    }
}

#[tokio::test]
async fn manual_mode_choice_survives_reanalysis() {
    let mut s = loaded_session().await;
    let chat = StubChat::replying(TWO_ENTRIES);
    s.set_capabilities(caps()).unwrap();

    assert_eq!(s.resolve_mode("vision/model"), ProcessingMode::RichContent);
    s.set_mode(ProcessingMode::TextOnly);
    s.analyze(&chat, &api("vision/model")).await.unwrap();
    s.analyze(&chat, &api("vision/model")).await.unwrap();
    assert_eq!(s.mode(), ProcessingMode::TextOnly);
    assert!(matches!(
        chat.last_request().messages[1].content,
        MessageContent::Text(_)
    ));
}

#[tokio::test]
async fn missing_capabilities_fall_back_to_text() {
    let mut s = loaded_session().await;
    let chat = StubChat::replying(TWO_ENTRIES);
    s.analyze(&chat, &api("vision/model")).await.unwrap();
    assert_eq!(s.mode(), ProcessingMode::TextOnly);
}

#[tokio::test]
async fn partial_reply_is_kept_with_warning() {
    let mut s = loaded_session().await;
    let chat = StubChat::replying(
        r#"{"responses":[{"prompt":"Sample size","response":"120","source":"N=120","page":"3"}]}"#,
    );
    let warning = s.analyze(&chat, &api("text/model")).await.unwrap().unwrap();
    assert_eq!((warning.expected, warning.received), (2, 1));
    assert_eq!(s.last_warning(), Some(&warning));
    assert_eq!(s.entry(0).unwrap().response, "120");
    assert_eq!(s.entry(1).unwrap(), &ResponseEntry::default());
    s.record(0).unwrap();
    assert!(matches!(s.record(1), Err(AideError::EmptyResponse { index: 1 })));
}

#[tokio::test]
async fn fenced_reply_is_accepted() {
    let mut s = loaded_session().await;
    let chat = StubChat::replying(&format!("```json\n{TWO_ENTRIES}\n```"));
    s.analyze(&chat, &api("text/model")).await.unwrap();
    assert_eq!(s.entry(0).unwrap().response, "120");
}

#[tokio::test]
async fn failed_analysis_leaves_drafts_untouched() {
    let mut s = loaded_session().await;
    s.analyze(&StubChat::replying(TWO_ENTRIES), &api("text/model"))
        .await
        .unwrap();

    let err = s
        .analyze(&StubChat::replying("I could not read the PDF."), &api("text/model"))
        .await
        .unwrap_err();
    assert!(err.is_invalid_output());
    assert_eq!(s.entry(0).unwrap().response, "120");

    let err = s
        .analyze(&StubChat::failing(401), &api("text/model"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Invalid API key"));
    assert_eq!(s.entry(0).unwrap().response, "120");
    assert!(!s.is_analyzing());
}

#[tokio::test]
async fn only_one_analysis_in_flight() {
    let mut s = loaded_session().await;
    let chat = StubChat::replying(TWO_ENTRIES);
    let api = api("text/model");

    let ticket = s.begin_analysis(&api).unwrap();
    assert!(s.is_analyzing());
    assert!(matches!(
        s.begin_analysis(&api),
        Err(AideError::AnalysisInProgress)
    ));

    let outcome = ticket.run(&chat).await;
    assert!(s.is_analyzing());
    s.finish_analysis(outcome).unwrap();
    assert!(!s.is_analyzing());
    assert!(s.begin_analysis(&api).is_ok());
}

#[tokio::test]
async fn dropped_ticket_releases_the_guard() {
    let mut s = loaded_session().await;
    let api = api("text/model");
    drop(s.begin_analysis(&api).unwrap());
    assert!(!s.is_analyzing());
    assert!(s.begin_analysis(&api).is_ok());
}

#[tokio::test]
async fn result_for_previous_document_is_discarded() {
    let mut s = loaded_session().await;
    let ticket = s.begin_analysis(&api("text/model")).unwrap();
    s.next_document().unwrap();
    let outcome = ticket.run(&StubChat::replying(TWO_ENTRIES)).await;
    assert_eq!(s.finish_analysis(outcome).unwrap(), None);
    assert!(s.lifecycle().entries().iter().all(|e| e.response.is_empty()));
}

#[tokio::test]
async fn render_failure_still_allows_text_analysis() {
    let backend = Arc::new(FakePdf {
        pages: 2,
        render_fails: true,
        text_fails: false,
    });
    let mut s = session_with(MemorySessionStore::new(), backend);
    let status = s.load_document(pdf("scan.pdf")).await;
    assert!(status.render_error.unwrap().contains("scan.pdf"));
    assert!(status.text_error.is_none());
    assert!(s.viewer().pages().is_empty());

    s.analyze(&StubChat::replying(TWO_ENTRIES), &api("text/model"))
        .await
        .unwrap();
    assert_eq!(s.entry(0).unwrap().response, "120");
}

#[tokio::test]
async fn missing_text_blocks_text_mode_only() {
    let backend = Arc::new(FakePdf {
        pages: 2,
        render_fails: false,
        text_fails: true,
    });
    let mut s = session_with(MemorySessionStore::new(), backend);
    let status = s.load_document(pdf("scan.pdf")).await;
    assert!(status.text_error.is_some());
    assert_eq!(status.page_count, 2);

    let chat = StubChat::replying(TWO_ENTRIES);
    assert!(matches!(
        s.analyze(&chat, &api("text/model")).await,
        Err(AideError::MissingInput(_))
    ));
    assert!(!s.is_analyzing());

    s.set_mode(ProcessingMode::RichContent);
    s.analyze(&chat, &api("text/model")).await.unwrap();
    assert_eq!(s.entry(1).unwrap().response, "Not found");
}

#[tokio::test]
async fn analysis_needs_form_and_document() {
    let mut s = ExtractionSession::open(
        MemorySessionStore::new(),
        FakePdf::healthy(1),
        ViewerConfig::default(),
    )
    .unwrap();
    let chat = StubChat::replying(TWO_ENTRIES);
    assert!(matches!(
        s.analyze(&chat, &api("text/model")).await,
        Err(AideError::MissingInput(_))
    ));
    s.import_form(form()).unwrap();
    assert!(matches!(
        s.analyze(&chat, &api("text/model")).await,
        Err(AideError::MissingInput(_))
    ));
    assert!(chat.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn max_tokens_reaches_the_request() {
    let mut s = loaded_session().await;
    let chat = StubChat::replying(TWO_ENTRIES);
    let api = ApiConfig::builder()
        .endpoint("https://api.openai.com/v1/chat/completions")
        .api_key("sk")
        .model("gpt-4o-mini")
        .max_tokens(16_384)
        .build()
        .unwrap();
    s.analyze(&chat, &api).await.unwrap();
    assert_eq!(chat.last_request().max_tokens, Some(16_384));
}

#[tokio::test]
async fn failed_persist_rolls_back_record() {
    let fail = Arc::new(AtomicBool::new(false));
    let store = FlakyStore {
        inner: MemorySessionStore::new(),
        fail: Arc::clone(&fail),
    };
    let mut s = session_with(store, FakePdf::healthy(1));
    s.load_document(pdf("a.pdf")).await;
    s.analyze(&StubChat::replying(TWO_ENTRIES), &api("text/model"))
        .await
        .unwrap();

    fail.store(true, Ordering::SeqCst);
    assert!(matches!(s.record(0), Err(AideError::OutputWriteFailed { .. })));
    assert!(!s.lifecycle().is_recorded(0));
    assert_eq!(s.form().unwrap().row_count(), 0);
    assert!(s.next_document().is_err());
    assert_eq!(s.form().unwrap().row_count(), 0);

    fail.store(false, Ordering::SeqCst);
    s.record(0).unwrap();
    assert_eq!(s.form().unwrap().cell(0, "Sample size"), Some("120"));
}

#[tokio::test]
async fn record_all_skips_empty_drafts() {
    let mut s = loaded_session().await;
    s.analyze(
        &StubChat::replying(r#"{"responses":[{"response":"120"},{"response":"  "}]}"#),
        &api("text/model"),
    )
    .await
    .unwrap();
    assert_eq!(s.record_all().unwrap(), 1);
    assert!(s.lifecycle().is_recorded(0));
    assert!(!s.lifecycle().is_recorded(1));
}

#[tokio::test]
async fn file_backed_session_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aide_session.json");
    {
        let store = FileSessionStore::open(&path).unwrap();
        let mut s = session_with(store, FakePdf::healthy(1));
        s.load_document(pdf("a.pdf")).await;
        s.analyze(&StubChat::replying(TWO_ENTRIES), &api("text/model"))
            .await
            .unwrap();
        s.record(1).unwrap();
        s.set_capabilities(caps()).unwrap();
    }

    let store = FileSessionStore::open(&path).unwrap();
    assert!(store.get(keys::CODING_FORM).unwrap().is_some());
    let s = ExtractionSession::open(store, FakePdf::healthy(1), ViewerConfig::default()).unwrap();
    let f = s.form().unwrap();
    assert_eq!(f.headers(), ["Sample size", "Country"]);
    assert_eq!(f.cell(0, "Country"), Some("Not found"));
    assert_eq!(s.capabilities().unwrap()["vision/model"], ["text", "file"]);
    // Review state is per document and not persisted.
    assert_eq!(s.lifecycle().recorded_count(), 0);
}

#[tokio::test]
async fn highlight_follows_cited_page() {
    let mut s = loaded_session().await;
    s.analyze(&StubChat::replying(TWO_ENTRIES), &api("text/model"))
        .await
        .unwrap();
    let entry = s.entry(0).unwrap().clone();
    assert_eq!(s.viewer_mut().highlight_entry(&entry), Some(3));
    let entry = s.entry(1).unwrap().clone();
    assert_eq!(s.viewer_mut().highlight_entry(&entry), None);
}
