//! Pipeline stages for one extraction pass over a document.
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//!                   ┌─▶ render ──▶ zoom        (preview for the reviewer)
//! input ──▶ source ─┤
//!                   └─▶ text ──┐
//!                      encode ─┴▶ request ──▶ llm ──▶ validate ──▶ lifecycle
//! ```
//!
//! 1. [`input`]    resolve a path or URL to in-memory PDF bytes
//! 2. [`render`]   rasterise every page once at base scale; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`zoom`]     presentation scale over the rendered pages
//! 4. [`text`]     plain-text extraction for text-only mode
//! 5. [`encode`]   base64 for PDF attachments, PNG for previews
//! 6. [`request`]  build the chat-completions body
//! 7. [`llm`]      the only stage with network I/O
//! 8. [`validate`] strip, parse and shape-check the model's reply

pub mod encode;
pub mod input;
pub mod llm;
pub mod render;
pub mod request;
pub mod text;
pub mod validate;
pub mod zoom;
