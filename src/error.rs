//! Error types for the aide-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`AideError`] — **Fatal** for the operation that raised it: the import,
//!   analysis, render or record call is aborted and the prior session state is
//!   left untouched. Every variant carries a message fit to show the reviewer.
//!
//! * [`CardinalityWarning`] — **Non-fatal**: the model answered, but with a
//!   different number of entries than prompts were sent. The partial result is
//!   still handed to the reviewer, index-aligned, together with this warning.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the aide-extract library.
#[derive(Debug, Error)]
pub enum AideError {
    // ── Coding-form import ────────────────────────────────────────────────
    /// The tabular source could not be parsed.
    #[error("Could not import coding form '{source_name}': {detail}")]
    Import { source_name: String, detail: String },

    /// The tabular source parsed, but its first row holds no header cells.
    #[error("Coding form '{source_name}' has no header row.\nThe first row must list the prompts, one per column.")]
    EmptyHeaderRow { source_name: String },

    /// The file extension is not a known tabular format.
    #[error("Unsupported coding form format '{extension}'\nUse .csv, .tsv, .xlsx, .xls or .ods.")]
    UnsupportedFormat { extension: String },

    // ── Coding-form export ────────────────────────────────────────────────
    /// Building the export payload failed.
    #[error("Could not export coding form: {0}")]
    Export(String),

    // ── Coding-form writes ────────────────────────────────────────────────
    /// A write named a column the form does not have.
    #[error("Unknown coding form column '{header}'")]
    UnknownHeader { header: String },

    /// A prompt index outside `[0, prompt_count)`.
    #[error("Prompt {index} is out of range (form has {count} prompts)")]
    PromptOutOfRange { index: usize, count: usize },

    /// Recording requires a non-empty response.
    #[error("Prompt {index} has no response to record")]
    EmptyResponse { index: usize },

    /// The prompt is already recorded; reopen it before recording again.
    #[error("Prompt {index} is already recorded.\nRe-record it first to edit or record a new value.")]
    AlreadyRecorded { index: usize },

    /// Editing a recorded response is refused until the prompt is reopened.
    #[error("Prompt {index} is recorded and locked for editing")]
    PromptLocked { index: usize },

    // ── Document input ────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// The bytes were read, but they are not a PDF.
    #[error("Document '{name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: Vec<u8> },

    // ── Rendering ─────────────────────────────────────────────────────────
    /// Decoding or rasterising the document failed; preview is unavailable.
    #[error("Failed to load PDF '{name}': {detail}")]
    RenderFailed { name: String, detail: String },

    /// Plain-text extraction failed.
    #[error("Could not extract text from PDF '{name}': {detail}")]
    TextExtractionFailed { name: String, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium as a system library.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Remote call ───────────────────────────────────────────────────────
    /// The request never produced an HTTP response.
    #[error("Network error calling '{endpoint}': {detail}")]
    Network { endpoint: String, detail: String },

    /// The remote API answered with a non-2xx status.
    #[error("LLM API error ({status}): {message}")]
    RemoteStatus { status: u16, message: String },

    /// 2xx response without `choices[0].message.content`.
    #[error("No response content from API")]
    EmptyCompletion,

    // ── Response validation ───────────────────────────────────────────────
    /// The model reply is not JSON, even after stripping code fences.
    #[error("Model did not return valid structured output: {detail}")]
    MalformedResponse { raw: String, detail: String },

    /// The reply is JSON but lacks a `responses` sequence of objects.
    #[error("Model did not return valid structured output: {0}")]
    Schema(String),

    // ── Session state ─────────────────────────────────────────────────────
    /// An analysis call is already in flight.
    #[error("An analysis is already in progress")]
    AnalysisInProgress,

    /// A precondition for the action is missing (document, form, API setup).
    #[error("{0}")]
    MissingInput(String),

    /// A persisted session slot could not be decoded.
    #[error("Session slot '{key}' is corrupt: {detail}")]
    CorruptSession { key: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AideError {
    /// True for errors raised while validating model output.
    pub fn is_invalid_output(&self) -> bool {
        matches!(
            self,
            AideError::MalformedResponse { .. } | AideError::Schema(_)
        )
    }
}

/// The model returned a different number of entries than prompts were sent.
///
/// Reconciliation is by index order: entry `i` fills prompt `i`, prompts
/// without an entry stay empty, surplus entries are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Response count mismatch: expected {expected}, got {received}")]
pub struct CardinalityWarning {
    pub expected: usize,
    pub received: usize,
}
