//! The extraction session: persisted slots plus the per-document workflow.
//!
//! ## Persistence
//!
//! Session state lives in named string slots behind [`SessionStore`]. The
//! slot names are fixed (see [`keys`]) so a session written by one host can
//! be resumed by another. [`MemorySessionStore`] keeps slots in memory;
//! [`FileSessionStore`] keeps them in one JSON object on disk.
//!
//! ## Workflow
//!
//! ```text
//! import_form ─▶ load_document ─▶ analyze ─▶ record / edit / re_record ─▶ next_document
//!                     ▲                                                        │
//!                     └────────────────────────────────────────────────────────┘
//! ```
//!
//! [`ExtractionSession`] owns the form, the response lifecycle, the viewer
//! and the mode selector, and is the only place they are combined. Form
//! updates are persisted before they are adopted; a failed write leaves the
//! session exactly as it was.
//!
//! ## One analysis at a time
//!
//! [`ExtractionSession::begin_analysis`] hands out an [`AnalysisTicket`]
//! that holds an in-flight flag until its outcome is applied or dropped.
//! A second `begin_analysis` while the flag is held fails with
//! [`AideError::AnalysisInProgress`]; it is never queued.

use crate::capability::{CapabilityMap, ModeSelector, ProcessingMode};
use crate::config::{ApiConfig, ViewerConfig};
use crate::error::{AideError, CardinalityWarning};
use crate::form::{import, CodingForm};
use crate::lifecycle::{ResponseEntry, ResponseLifecycle};
use crate::pipeline::input::DocumentSource;
use crate::pipeline::llm::{normalize_model_id, ChatBackend};
use crate::pipeline::render::{DocumentRenderPipeline, PdfBackend, RenderState};
use crate::pipeline::request::{DocumentContent, ExtractionRequest, ExtractionRequestBuilder};
use crate::pipeline::text::extract_text;
use crate::pipeline::validate::{validate_response, ValidatedResponses};
use crate::progress::{AnalysisStage, NoopProgressCallback, ProgressCallback};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Slot names.
pub mod keys {
    pub const API_ENDPOINT: &str = "aide_api_endpoint";
    pub const API_KEY: &str = "aide_api_key";
    pub const CONTEXT_WINDOW: &str = "aide_context_window";
    pub const MODEL: &str = "aide_model";
    pub const CODING_FORM: &str = "aide_coding_form_data";
    pub const MODEL_CAPABILITIES: &str = "aide_model_capabilities";
}

/// Named string slots.
pub trait SessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, AideError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), AideError>;
    fn remove(&mut self, key: &str) -> Result<(), AideError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    slots: BTreeMap<String, String>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, AideError> {
        Ok(self.slots.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), AideError> {
        self.slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), AideError> {
        self.slots.remove(key);
        Ok(())
    }
}

/// Slots kept as one JSON object in a file, rewritten atomically on change.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
    slots: BTreeMap<String, String>,
}

impl FileSessionStore {
    /// Open `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AideError> {
        let path = path.into();
        let slots = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| AideError::CorruptSession {
                key: path.display().to_string(),
                detail: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(AideError::CorruptSession {
                    key: path.display().to_string(),
                    detail: e.to_string(),
                })
            }
        };
        debug!("Opened session {} ({} slots)", path.display(), slots.len());
        Ok(Self { path, slots })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), AideError> {
        let write_err = |source: std::io::Error| AideError::OutputWriteFailed {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(&self.slots)
            .map_err(|e| AideError::Internal(format!("session serialisation failed: {e}")))?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(write_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, AideError> {
        Ok(self.slots.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), AideError> {
        let previous = self.slots.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush() {
            match previous {
                Some(v) => self.slots.insert(key.to_string(), v),
                None => self.slots.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), AideError> {
        if let Some(previous) = self.slots.remove(key) {
            if let Err(e) = self.flush() {
                self.slots.insert(key.to_string(), previous);
                return Err(e);
            }
        }
        Ok(())
    }
}

// ── Typed slot access ────────────────────────────────────────────────────

fn corrupt(key: &str, e: impl std::fmt::Display) -> AideError {
    AideError::CorruptSession {
        key: key.to_string(),
        detail: e.to_string(),
    }
}

pub fn load_form(store: &impl SessionStore) -> Result<Option<CodingForm>, AideError> {
    store
        .get(keys::CODING_FORM)?
        .map(|json| serde_json::from_str(&json).map_err(|e| corrupt(keys::CODING_FORM, e)))
        .transpose()
}

pub fn save_form(store: &mut impl SessionStore, form: &CodingForm) -> Result<(), AideError> {
    let json = serde_json::to_string(form).map_err(|e| corrupt(keys::CODING_FORM, e))?;
    store.set(keys::CODING_FORM, &json)
}

pub fn load_capabilities(store: &impl SessionStore) -> Result<Option<CapabilityMap>, AideError> {
    store
        .get(keys::MODEL_CAPABILITIES)?
        .map(|json| {
            serde_json::from_str(&json).map_err(|e| corrupt(keys::MODEL_CAPABILITIES, e))
        })
        .transpose()
}

pub fn save_capabilities(
    store: &mut impl SessionStore,
    caps: &CapabilityMap,
) -> Result<(), AideError> {
    let json = serde_json::to_string(caps).map_err(|e| corrupt(keys::MODEL_CAPABILITIES, e))?;
    store.set(keys::MODEL_CAPABILITIES, &json)
}

/// Read the API settings. `Ok(None)` when endpoint, key or model is unset.
///
/// A stale `:free` model suffix is stripped and written back.
pub fn load_api_config(store: &mut impl SessionStore) -> Result<Option<ApiConfig>, AideError> {
    let (Some(endpoint), Some(api_key), Some(stored_model)) = (
        store.get(keys::API_ENDPOINT)?,
        store.get(keys::API_KEY)?,
        store.get(keys::MODEL)?,
    ) else {
        return Ok(None);
    };

    let model = normalize_model_id(&stored_model).to_string();
    if model != stored_model {
        info!("Normalised stale model id '{}' → '{}'", stored_model, model);
        store.set(keys::MODEL, &model)?;
    }

    let max_tokens = match store.get(keys::CONTEXT_WINDOW)? {
        Some(s) if !s.trim().is_empty() => Some(
            s.trim()
                .parse::<u32>()
                .map_err(|e| corrupt(keys::CONTEXT_WINDOW, e))?,
        ),
        _ => None,
    };

    ApiConfig::builder()
        .endpoint(endpoint)
        .api_key(api_key)
        .model(model)
        .max_tokens_opt(max_tokens)
        .build()
        .map(Some)
}

pub fn save_api_config(store: &mut impl SessionStore, api: &ApiConfig) -> Result<(), AideError> {
    store.set(keys::API_ENDPOINT, &api.endpoint)?;
    store.set(keys::API_KEY, &api.api_key)?;
    store.set(keys::MODEL, &api.model)?;
    match api.max_tokens {
        Some(n) => store.set(keys::CONTEXT_WINDOW, &n.to_string()),
        None => store.remove(keys::CONTEXT_WINDOW),
    }
}

// ── Analysis tickets ─────────────────────────────────────────────────────

/// Clears the in-flight flag on drop.
#[derive(Debug)]
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A prepared analysis call. Does not borrow the session.
pub struct AnalysisTicket {
    guard: InFlightGuard,
    request: ExtractionRequest,
    prompt_count: usize,
    generation: u64,
    mode: ProcessingMode,
    progress: ProgressCallback,
}

impl std::fmt::Debug for AnalysisTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisTicket")
            .field("model", &self.request.model)
            .field("prompt_count", &self.prompt_count)
            .field("mode", &self.mode)
            .finish()
    }
}

impl AnalysisTicket {
    pub fn request(&self) -> &ExtractionRequest {
        &self.request
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    /// Send the request and validate the reply.
    pub async fn run(self, backend: &dyn ChatBackend) -> AnalysisOutcome {
        self.progress.on_stage(AnalysisStage::SendingRequest);
        let result = match backend.complete(&self.request).await {
            Ok(raw) => {
                self.progress.on_stage(AnalysisStage::ProcessingResults);
                validate_response(&raw, self.prompt_count)
            }
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!("Analysis failed: {e}");
        }
        AnalysisOutcome {
            _guard: self.guard,
            generation: self.generation,
            result,
        }
    }
}

/// Result of [`AnalysisTicket::run`], to apply with
/// [`ExtractionSession::finish_analysis`].
#[derive(Debug)]
pub struct AnalysisOutcome {
    _guard: InFlightGuard,
    generation: u64,
    result: Result<ValidatedResponses, AideError>,
}

/// What happened when a document was loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentStatus {
    pub name: String,
    pub page_count: usize,
    /// Set when the preview could not be rendered.
    pub render_error: Option<String>,
    /// Set when plain text could not be extracted.
    pub text_error: Option<String>,
}

// ── Session ──────────────────────────────────────────────────────────────

/// Everything the reviewer works with for the current document.
pub struct ExtractionSession<S: SessionStore> {
    store: S,
    form: Option<CodingForm>,
    lifecycle: ResponseLifecycle,
    document: Option<DocumentSource>,
    document_generation: u64,
    text: Option<String>,
    viewer: DocumentRenderPipeline,
    mode: ModeSelector,
    capabilities: Option<CapabilityMap>,
    in_flight: Arc<AtomicBool>,
    last_warning: Option<CardinalityWarning>,
    progress: ProgressCallback,
}

impl<S: SessionStore> ExtractionSession<S> {
    /// Resume from `store`, restoring the form and capability map.
    pub fn open(
        store: S,
        pdf: Arc<dyn PdfBackend>,
        viewer: ViewerConfig,
    ) -> Result<Self, AideError> {
        let form = load_form(&store)?;
        let capabilities = load_capabilities(&store)?;
        let prompt_count = form.as_ref().map_or(0, |f| f.headers().len());
        if let Some(f) = &form {
            debug!("Restored coding form: {} prompts, {} rows", prompt_count, f.row_count());
        }
        Ok(Self {
            store,
            form,
            lifecycle: ResponseLifecycle::new(prompt_count),
            document: None,
            document_generation: 0,
            text: None,
            viewer: DocumentRenderPipeline::new(pdf, viewer),
            mode: ModeSelector::default(),
            capabilities,
            in_flight: Arc::new(AtomicBool::new(false)),
            last_warning: None,
            progress: Arc::new(NoopProgressCallback),
        })
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn form(&self) -> Option<&CodingForm> {
        self.form.as_ref()
    }

    pub fn lifecycle(&self) -> &ResponseLifecycle {
        &self.lifecycle
    }

    pub fn document(&self) -> Option<&DocumentSource> {
        self.document.as_ref()
    }

    pub fn extracted_text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn viewer(&self) -> &DocumentRenderPipeline {
        &self.viewer
    }

    pub fn viewer_mut(&mut self) -> &mut DocumentRenderPipeline {
        &mut self.viewer
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode.mode()
    }

    pub fn mode_selector(&self) -> &ModeSelector {
        &self.mode
    }

    pub fn capabilities(&self) -> Option<&CapabilityMap> {
        self.capabilities.as_ref()
    }

    pub fn last_warning(&self) -> Option<&CardinalityWarning> {
        self.last_warning.as_ref()
    }

    pub fn is_analyzing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn require_form(&self) -> Result<&CodingForm, AideError> {
        self.form
            .as_ref()
            .ok_or_else(|| AideError::MissingInput("No coding form loaded. Import one first.".into()))
    }

    // ── Form ─────────────────────────────────────────────────────────────

    /// Replace the coding form. Drafts and the recorded set start over.
    pub fn import_form(&mut self, form: CodingForm) -> Result<(), AideError> {
        save_form(&mut self.store, &form)?;
        info!(
            "Coding form loaded: {} prompts, {} rows",
            form.headers().len(),
            form.row_count()
        );
        self.lifecycle = ResponseLifecycle::new(form.headers().len());
        self.form = Some(form);
        self.last_warning = None;
        Ok(())
    }

    /// Import a tabular file and make it the session's form.
    pub fn import_path(&mut self, path: impl AsRef<Path>) -> Result<&CodingForm, AideError> {
        let form = import::load_path(path)?;
        self.import_form(form)?;
        self.require_form()
    }

    /// Replace the capability map from a fresh model listing.
    pub fn set_capabilities(&mut self, caps: CapabilityMap) -> Result<(), AideError> {
        save_capabilities(&mut self.store, &caps)?;
        self.capabilities = Some(caps);
        Ok(())
    }

    // ── Document ─────────────────────────────────────────────────────────

    /// Make `source` the current document: render its pages and extract
    /// its text concurrently. Neither failure is fatal; both are reported.
    pub async fn load_document(&mut self, source: DocumentSource) -> DocumentStatus {
        self.document_generation += 1;
        self.lifecycle.apply_responses(&[]);
        self.last_warning = None;
        self.text = None;

        let backend = self.viewer.backend();
        let progress = Arc::clone(&self.progress);
        let (text, state) = tokio::join!(
            extract_text(backend, &source),
            self.viewer.load(source.clone(), progress)
        );
        let render_error = match state {
            RenderState::Failed { message } => Some(message.clone()),
            _ => None,
        };

        let text_error = match text {
            Ok(t) => {
                self.text = Some(t);
                None
            }
            Err(e) => {
                warn!("{e}");
                Some(e.to_string())
            }
        };

        let status = DocumentStatus {
            name: source.name().to_string(),
            page_count: self.viewer.page_count(),
            render_error,
            text_error,
        };
        self.document = Some(source);
        status
    }

    /// Pre-select the processing mode for the current document and `model`.
    pub fn resolve_mode(&mut self, model: &str) -> ProcessingMode {
        let doc = self.document.as_ref().map_or("", |d| d.name());
        self.mode.resolve_for(doc, model, self.capabilities.as_ref())
    }

    /// Manual mode choice; kept until the document or model changes.
    pub fn set_mode(&mut self, mode: ProcessingMode) {
        info!("Processing mode set to '{}'", mode);
        let doc = self.document.as_ref().map_or("", |d| d.name());
        self.mode.select(doc, mode);
    }

    // ── Analysis ─────────────────────────────────────────────────────────

    /// Prepare one analysis call for the current document.
    pub fn begin_analysis(&mut self, api: &ApiConfig) -> Result<AnalysisTicket, AideError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AideError::AnalysisInProgress);
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        self.progress.on_stage(AnalysisStage::PreparingRequest);
        let prompts = self.require_form()?.prompts().to_vec();
        if prompts.is_empty() {
            return Err(AideError::MissingInput("The coding form has no prompts.".into()));
        }
        let document = self
            .document
            .clone()
            .ok_or_else(|| AideError::MissingInput("No PDF loaded. Load a document first.".into()))?;

        let mode = self.resolve_mode(&api.model);
        let content = match mode {
            ProcessingMode::RichContent => {
                self.progress.on_stage(AnalysisStage::EncodingDocument);
                DocumentContent::attach(&document)
            }
            ProcessingMode::TextOnly => {
                self.progress.on_stage(AnalysisStage::UsingExtractedText);
                let text = self.text.clone().ok_or_else(|| {
                    AideError::MissingInput(format!(
                        "Could not extract text from '{}'. Switch to '{}' mode or load another PDF.",
                        document.name(),
                        ProcessingMode::RichContent
                    ))
                })?;
                DocumentContent::Text(text)
            }
        };

        let request = ExtractionRequestBuilder::new(api.model.clone())
            .prompts(&prompts)
            .content(content)
            .max_tokens(api.max_tokens)
            .build();
        info!(
            "Analysing '{}' with {} ({} prompts, mode '{}')",
            document.name(),
            api.model,
            prompts.len(),
            mode
        );

        Ok(AnalysisTicket {
            guard,
            request,
            prompt_count: prompts.len(),
            generation: self.document_generation,
            mode,
            progress: Arc::clone(&self.progress),
        })
    }

    /// Apply a finished analysis to the drafts.
    ///
    /// On error the drafts are untouched. An outcome for a document that is
    /// no longer current is discarded.
    pub fn finish_analysis(
        &mut self,
        outcome: AnalysisOutcome,
    ) -> Result<Option<CardinalityWarning>, AideError> {
        if outcome.generation != self.document_generation {
            info!("Discarding analysis result for a document that is no longer loaded");
            return Ok(None);
        }
        let validated = outcome.result?;
        self.lifecycle.apply_responses(&validated.entries);
        self.last_warning = validated.warning.clone();
        Ok(validated.warning)
    }

    /// Run a full analysis of the current document.
    pub async fn analyze(
        &mut self,
        backend: &dyn ChatBackend,
        api: &ApiConfig,
    ) -> Result<Option<CardinalityWarning>, AideError> {
        let ticket = self.begin_analysis(api)?;
        let outcome = ticket.run(backend).await;
        self.finish_analysis(outcome)
    }

    // ── Review ───────────────────────────────────────────────────────────

    pub fn entry(&self, index: usize) -> Result<&ResponseEntry, AideError> {
        self.lifecycle.entry(index)
    }

    pub fn edit_response(&mut self, index: usize, value: impl Into<String>) -> Result<(), AideError> {
        self.lifecycle.edit_response(index, value)
    }

    /// Commit the draft at `index` into the form's current row and persist.
    pub fn record(&mut self, index: usize) -> Result<(), AideError> {
        let form = self.require_form()?.clone();
        let updated = self.lifecycle.record(index, &form)?;
        if let Err(e) = save_form(&mut self.store, &updated) {
            self.lifecycle.re_record(index)?;
            return Err(e);
        }
        self.form = Some(updated);
        Ok(())
    }

    /// Record every unrecorded draft that has a value. Returns how many.
    pub fn record_all(&mut self) -> Result<usize, AideError> {
        let pending: Vec<usize> = (0..self.lifecycle.prompt_count())
            .filter(|&i| {
                !self.lifecycle.is_recorded(i)
                    && self
                        .lifecycle
                        .entry(i)
                        .is_ok_and(|e| !e.response.trim().is_empty())
            })
            .collect();
        for &i in &pending {
            self.record(i)?;
        }
        Ok(pending.len())
    }

    pub fn re_record(&mut self, index: usize) -> Result<(), AideError> {
        self.lifecycle.re_record(index)
    }

    /// Finish the current document: append a blank row, clear the drafts,
    /// the recorded set and the loaded document.
    pub fn next_document(&mut self) -> Result<(), AideError> {
        let updated = self.require_form()?.append_blank_row();
        save_form(&mut self.store, &updated)?;
        info!("Advanced to row {}", updated.row_count());
        self.form = Some(updated);
        self.lifecycle.reset_all();
        self.document = None;
        self.document_generation += 1;
        self.text = None;
        self.last_warning = None;
        self.viewer.clear();
        Ok(())
    }
}
