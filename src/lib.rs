//! # aide-extract
//!
//! LLM-assisted, human-validated data extraction from PDF documents.
//!
//! A reviewer imports a *coding form*: a table whose header row lists the
//! questions to answer for every document. For each PDF the model suggests
//! an answer to every question, with a verbatim source excerpt and page. The
//! reviewer checks each suggestion against the rendered pages and explicitly
//! *records* it. Only recorded values reach the form; nothing the model says
//! is trusted by default.
//!
//! ## Session Overview
//!
//! ```text
//! coding form (csv / xlsx)
//!  │
//!  ├─ 1. Import    header row = prompts, one body row per document
//!  ├─ 2. Load PDF  render every page once (pdfium, spawn_blocking) + extract text
//!  ├─ 3. Mode      send the PDF itself or only its text, per model capabilities
//!  ├─ 4. Analyze   one chat-completions call with all prompts, JSON reply
//!  ├─ 5. Validate  strip fences → parse → shape → cardinality
//!  ├─ 6. Review    edit / record / re-record each answer
//!  ├─ 7. Next      append a blank row, reset review state
//!  └─ 8. Export    csv or xlsx
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aide_extract::{
//!     resolve_input, ApiConfig, ExtractionSession, HttpChatBackend, MemorySessionStore,
//!     PdfiumBackend, ViewerConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = ApiConfig::builder()
//!         .endpoint("https://openrouter.ai/api/v1/chat/completions")
//!         .api_key(std::env::var("AIDE_API_KEY")?)
//!         .model("openai/gpt-4.1-mini")
//!         .build()?;
//!
//!     let mut session = ExtractionSession::open(
//!         MemorySessionStore::new(),
//!         Arc::new(PdfiumBackend::from_env()),
//!         ViewerConfig::default(),
//!     )?;
//!     session.import_path("coding_form.csv")?;
//!     session.load_document(resolve_input("trial.pdf", 120).await?).await;
//!
//!     let backend = HttpChatBackend::new(api.clone())?;
//!     if let Some(warning) = session.analyze(&backend, &api).await? {
//!         eprintln!("{warning}");
//!     }
//!     for (i, entry) in session.lifecycle().entries().iter().enumerate() {
//!         println!("{}: {} (p. {})", i + 1, entry.response, entry.page);
//!     }
//!     session.record(0)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `aide` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! aide-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod capability;
pub mod config;
pub mod error;
pub mod form;
pub mod lifecycle;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use capability::{resolve_mode, CapabilityMap, ModeOrigin, ModeSelector, ProcessingMode};
pub use config::{ApiConfig, ApiConfigBuilder, ViewerConfig, ViewerConfigBuilder};
pub use error::{AideError, CardinalityWarning};
pub use form::export::{default_file_name, ExportFormat};
pub use form::CodingForm;
pub use lifecycle::{PromptState, ResponseEntry, ResponseLifecycle};
pub use pipeline::input::{resolve_input, DocumentSource};
pub use pipeline::llm::{ChatBackend, HttpChatBackend, ModelInfo, ModelListing};
pub use pipeline::render::{
    DocumentRenderPipeline, PdfBackend, PdfiumBackend, RenderState, RenderedPage,
};
pub use pipeline::request::{DocumentContent, ExtractionRequest, ExtractionRequestBuilder};
pub use pipeline::validate::{validate_response, ValidatedResponses};
pub use pipeline::zoom::Zoom;
pub use progress::{AnalysisProgressCallback, AnalysisStage, NoopProgressCallback, ProgressCallback};
pub use session::{
    AnalysisOutcome, AnalysisTicket, DocumentStatus, ExtractionSession, FileSessionStore,
    MemorySessionStore, SessionStore,
};
