//! Document rasterisation and viewer state.
//!
//! ## Why rasterise everything up front?
//!
//! Every page is decoded once, at the fixed base scale from
//! [`ViewerConfig`], when a document loads. Zoom is then a pure presentation
//! transform over the existing rasters and never touches pdfium again.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is not safe
//! to call from async contexts. Each page is rendered in its own
//! `tokio::task::spawn_blocking` task; the tasks are joined with
//! `try_join_all` and the result is sorted back into page order, since
//! completion order is arbitrary.
//!
//! With [`PdfiumBackend`] the fan-out does not run in parallel. The
//! `thread_safe` bindings hold one process-wide lock around every pdfium
//! call, so the page tasks take turns, and each task binds the library and
//! parses the document again before rendering its page. Backends without a
//! global lock render concurrently.
//!
//! ## State
//!
//! ```text
//! Idle ──begin_load──▶ Loading ──complete──▶ Ready(pages)
//!                                    └─────▶ Failed { message }
//! ```
//!
//! A failure on any page fails the whole load; partially rendered pages are
//! dropped. Each load carries a generation number, and completing a load
//! whose generation is no longer current is a no-op.

use crate::config::ViewerConfig;
use crate::error::AideError;
use crate::lifecycle::ResponseEntry;
use crate::pipeline::encode::encode_png;
use crate::pipeline::input::DocumentSource;
use crate::pipeline::zoom::Zoom;
use crate::progress::ProgressCallback;
use futures::future::try_join_all;
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Blocking access to a PDF engine.
///
/// Every method may block; callers run them on the blocking pool.
pub trait PdfBackend: Send + Sync + 'static {
    fn page_count(&self, doc: &DocumentSource) -> Result<usize, AideError>;

    /// Rasterise page `index` (0-based) at `scale`, with the longest edge
    /// capped at `max_pixels`.
    fn render_page(
        &self,
        doc: &DocumentSource,
        index: usize,
        scale: f32,
        max_pixels: u32,
    ) -> Result<DynamicImage, AideError>;

    /// Plain text of page `index` (0-based).
    fn page_text(&self, doc: &DocumentSource, index: usize) -> Result<String, AideError>;
}

/// [`PdfBackend`] over the pdfium shared library.
///
/// The library is located through `PDFIUM_LIB_PATH` (a file or the
/// directory holding it), falling back to the system library search path.
#[derive(Debug, Clone, Default)]
pub struct PdfiumBackend {
    library_path: Option<PathBuf>,
}

impl PdfiumBackend {
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from))
    }

    fn bind(&self) -> Result<Pdfium, AideError> {
        let bindings = match &self.library_path {
            Some(path) => {
                let lib = if path.is_dir() {
                    Pdfium::pdfium_platform_library_name_at_path(path)
                } else {
                    path.clone()
                };
                Pdfium::bind_to_library(&lib)
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| AideError::PdfiumBindingFailed(e.to_string()))?;
        Ok(Pdfium::new(bindings))
    }
}

fn render_error(doc: &DocumentSource, detail: impl std::fmt::Debug) -> AideError {
    AideError::RenderFailed {
        name: doc.name().to_string(),
        detail: format!("{detail:?}"),
    }
}

impl PdfBackend for PdfiumBackend {
    fn page_count(&self, doc: &DocumentSource) -> Result<usize, AideError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(doc.bytes(), None)
            .map_err(|e| render_error(doc, e))?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(
        &self,
        doc: &DocumentSource,
        index: usize,
        scale: f32,
        max_pixels: u32,
    ) -> Result<DynamicImage, AideError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(doc.bytes(), None)
            .map_err(|e| render_error(doc, e))?;
        let page = document
            .pages()
            .get(index as u16)
            .map_err(|e| render_error(doc, e))?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(scale)
            .set_maximum_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| render_error(doc, e))?;
        Ok(bitmap.as_image())
    }

    fn page_text(&self, doc: &DocumentSource, index: usize) -> Result<String, AideError> {
        let text_error = |e: PdfiumError| AideError::TextExtractionFailed {
            name: doc.name().to_string(),
            detail: format!("{e:?}"),
        };
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(doc.bytes(), None)
            .map_err(text_error)?;
        let page = document.pages().get(index as u16).map_err(text_error)?;
        let text = page.text().map_err(text_error)?.all();
        Ok(text)
    }
}

/// One rasterised page at base resolution.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-based.
    pub page_number: usize,
    pub image: DynamicImage,
}

#[derive(Debug, Clone, Default)]
pub enum RenderState {
    #[default]
    Idle,
    Loading,
    Ready(Vec<RenderedPage>),
    Failed {
        message: String,
    },
}

/// A load in progress. Produced by [`DocumentRenderPipeline::begin_load`].
pub struct LoadTicket {
    generation: u64,
    source: DocumentSource,
    backend: Arc<dyn PdfBackend>,
    config: ViewerConfig,
}

/// A finished load, to hand back to [`DocumentRenderPipeline::complete`].
pub struct LoadOutcome {
    generation: u64,
    result: Result<Vec<RenderedPage>, AideError>,
}

impl LoadOutcome {
    pub fn result(&self) -> &Result<Vec<RenderedPage>, AideError> {
        &self.result
    }
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Rasterise every page concurrently.
    pub async fn run(self, progress: ProgressCallback) -> LoadOutcome {
        let result = render_all(self.backend, &self.source, &self.config, &progress).await;
        match &result {
            Ok(pages) => progress.on_render_complete(pages.len()),
            Err(e) => progress.on_render_failed(&e.to_string()),
        }
        LoadOutcome {
            generation: self.generation,
            result,
        }
    }
}

async fn render_all(
    backend: Arc<dyn PdfBackend>,
    source: &DocumentSource,
    config: &ViewerConfig,
    progress: &ProgressCallback,
) -> Result<Vec<RenderedPage>, AideError> {
    let total = {
        let backend = Arc::clone(&backend);
        let doc = source.clone();
        tokio::task::spawn_blocking(move || backend.page_count(&doc))
            .await
            .map_err(|e| AideError::Internal(format!("Render task panicked: {e}")))??
    };
    info!("PDF loaded: {} ({} pages)", source.name(), total);
    progress.on_render_start(total);

    let scale = config.base_scale;
    let max_pixels = config.max_rendered_pixels;
    let tasks = (0..total).map(|idx| {
        let backend = Arc::clone(&backend);
        let doc = source.clone();
        let progress = Arc::clone(progress);
        async move {
            let image = tokio::task::spawn_blocking(move || {
                backend.render_page(&doc, idx, scale, max_pixels)
            })
            .await
            .map_err(|e| AideError::Internal(format!("Render task panicked: {e}")))??;
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            progress.on_page_rendered(idx + 1, total);
            Ok::<_, AideError>(RenderedPage {
                page_number: idx + 1,
                image,
            })
        }
    });

    let mut pages = try_join_all(tasks).await?;
    pages.sort_by_key(|p| p.page_number);
    Ok(pages)
}

/// Rendered pages of the current document plus zoom and highlight.
pub struct DocumentRenderPipeline {
    backend: Arc<dyn PdfBackend>,
    config: ViewerConfig,
    state: RenderState,
    zoom: Zoom,
    highlight: Option<usize>,
    generation: u64,
}

impl DocumentRenderPipeline {
    pub fn new(backend: Arc<dyn PdfBackend>, config: ViewerConfig) -> Self {
        Self {
            backend,
            zoom: Zoom::from_config(&config),
            config,
            state: RenderState::Idle,
            highlight: None,
            generation: 0,
        }
    }

    pub fn backend(&self) -> Arc<dyn PdfBackend> {
        Arc::clone(&self.backend)
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, RenderState::Ready(_))
    }

    /// Pages of a ready document; empty in every other state.
    pub fn pages(&self) -> &[RenderedPage] {
        match &self.state {
            RenderState::Ready(pages) => pages,
            _ => &[],
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages().len()
    }

    /// Start loading `source`. Prior pages are discarded immediately.
    pub fn begin_load(&mut self, source: DocumentSource) -> LoadTicket {
        self.generation += 1;
        self.state = RenderState::Loading;
        self.highlight = None;
        LoadTicket {
            generation: self.generation,
            source,
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }

    /// Drop the current document. Any load still running becomes stale.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.state = RenderState::Idle;
        self.highlight = None;
    }

    /// Apply a finished load. Returns `false` when the outcome is stale.
    pub fn complete(&mut self, outcome: LoadOutcome) -> bool {
        if outcome.generation != self.generation {
            debug!(
                "Ignoring stale render (generation {} < {})",
                outcome.generation, self.generation
            );
            return false;
        }
        self.state = match outcome.result {
            Ok(pages) => RenderState::Ready(pages),
            Err(e) => {
                warn!("Render failed: {e}");
                RenderState::Failed {
                    message: e.to_string(),
                }
            }
        };
        true
    }

    /// Load and rasterise `source`, replacing the current document.
    pub async fn load(&mut self, source: DocumentSource, progress: ProgressCallback) -> &RenderState {
        let ticket = self.begin_load(source);
        let outcome = ticket.run(progress).await;
        self.complete(outcome);
        &self.state
    }

    pub fn zoom(&self) -> Zoom {
        self.zoom
    }

    pub fn zoom_in(&mut self) -> u32 {
        self.zoom.zoom_in()
    }

    pub fn zoom_out(&mut self) -> u32 {
        self.zoom.zoom_out()
    }

    pub fn reset_zoom(&mut self) {
        self.zoom.reset();
    }

    /// Size a page is shown at under the current zoom.
    pub fn display_size(&self, page: &RenderedPage) -> (u32, u32) {
        let f = self.zoom.factor();
        (
            ((page.image.width() as f32) * f).round().max(1.0) as u32,
            ((page.image.height() as f32) * f).round().max(1.0) as u32,
        )
    }

    pub fn highlighted_page(&self) -> Option<usize> {
        self.highlight
    }

    /// Highlight a 1-based page. Out-of-range pages clear the highlight.
    pub fn highlight_page(&mut self, page_number: usize) -> bool {
        if page_number >= 1 && page_number <= self.page_count() {
            self.highlight = Some(page_number);
            true
        } else {
            self.highlight = None;
            false
        }
    }

    /// Highlight the page a response cites, if it names one.
    pub fn highlight_entry(&mut self, entry: &ResponseEntry) -> Option<usize> {
        match entry.page_number() {
            Some(n) if self.highlight_page(n) => Some(n),
            _ => {
                self.highlight = None;
                None
            }
        }
    }

    pub fn clear_highlight(&mut self) {
        self.highlight = None;
    }

    /// Write each page as `page-NNN.png` at the current zoom.
    pub fn export_preview(&self, dir: &Path) -> Result<Vec<PathBuf>, AideError> {
        if !self.is_ready() {
            return Err(AideError::MissingInput(
                "No rendered pages to export. Load a PDF first.".to_string(),
            ));
        }
        std::fs::create_dir_all(dir).map_err(|source| AideError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::with_capacity(self.page_count());
        for page in self.pages() {
            let (w, h) = self.display_size(page);
            let png = if (w, h) == (page.image.width(), page.image.height()) {
                encode_png(&page.image)?
            } else {
                encode_png(&page.image.resize_exact(w, h, FilterType::Triangle))?
            };
            let path = dir.join(format!("page-{:03}.png", page.page_number));
            std::fs::write(&path, png).map_err(|source| AideError::OutputWriteFailed {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }
        info!("Wrote {} preview pages to {}", written.len(), dir.display());
        Ok(written)
    }
}
