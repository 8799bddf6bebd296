//! Progress-callback trait for analysis stages and page rendering.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] into
//! [`crate::session::ExtractionSession`] to receive events as a document is
//! rendered and analysed. The CLI forwards them to an `indicatif` spinner;
//! other hosts can forward them anywhere.
//!
//! # Example
//!
//! ```rust
//! use aide_extract::{AnalysisProgressCallback, AnalysisStage};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct StageLog(Mutex<Vec<String>>);
//!
//! impl AnalysisProgressCallback for StageLog {
//!     fn on_stage(&self, stage: AnalysisStage) {
//!         self.0.lock().unwrap().push(stage.to_string());
//!     }
//! }
//!
//! let log: Arc<dyn AnalysisProgressCallback> = Arc::new(StageLog::default());
//! log.on_stage(AnalysisStage::SendingRequest);
//! ```

use std::fmt;
use std::sync::Arc;

/// Steps of one analysis call, in the order they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    PreparingRequest,
    /// Rich-content mode: base64-encoding the PDF.
    EncodingDocument,
    /// Text-only mode: using the extracted text.
    UsingExtractedText,
    SendingRequest,
    ProcessingResults,
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnalysisStage::PreparingRequest => "Preparing request...",
            AnalysisStage::EncodingDocument => "Converting PDF to base64...",
            AnalysisStage::UsingExtractedText => "Extracting text from PDF...",
            AnalysisStage::SendingRequest => "Sending request to LLM...",
            AnalysisStage::ProcessingResults => "Processing results...",
        };
        f.write_str(s)
    }
}

/// Receives analysis and render events.
///
/// Implementations must be `Send + Sync`: page renders run concurrently on
/// the blocking pool and report from there. All methods default to no-ops.
pub trait AnalysisProgressCallback: Send + Sync {
    /// An analysis call moved to `stage`.
    fn on_stage(&self, stage: AnalysisStage) {
        let _ = stage;
    }

    /// Rendering of a document with `total_pages` pages is starting.
    fn on_render_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// One page finished rasterising. Order of calls is completion order.
    fn on_page_rendered(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    fn on_render_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }

    fn on_render_failed(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Shared callback handle, as stored by the session.
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
