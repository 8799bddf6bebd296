//! Plain-text extraction for text-only analysis.
//!
//! Runs independently of rendering: a document whose preview failed can
//! still be analysed from its text, and vice versa.

use crate::error::AideError;
use crate::pipeline::input::DocumentSource;
use crate::pipeline::render::PdfBackend;
use std::sync::Arc;
use tracing::{debug, info};

/// Text of every page, pages separated by a blank line.
pub async fn extract_text(
    backend: Arc<dyn PdfBackend>,
    source: &DocumentSource,
) -> Result<String, AideError> {
    let doc = source.clone();
    let name = source.name().to_string();
    let text = tokio::task::spawn_blocking(move || extract_text_blocking(backend.as_ref(), &doc))
        .await
        .map_err(|e| AideError::Internal(format!("Text extraction task panicked: {e}")))?
        .map_err(|e| match e {
            e @ AideError::TextExtractionFailed { .. } => e,
            other => AideError::TextExtractionFailed {
                name,
                detail: other.to_string(),
            },
        })?;
    info!("Extracted {} chars of text from {}", text.len(), source.name());
    Ok(text)
}

fn extract_text_blocking(backend: &dyn PdfBackend, doc: &DocumentSource) -> Result<String, AideError> {
    let total = backend.page_count(doc)?;
    let mut pages = Vec::with_capacity(total);
    for idx in 0..total {
        let text = backend.page_text(doc, idx)?;
        debug!("Page {}: {} chars", idx + 1, text.len());
        pages.push(text);
    }
    Ok(pages.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    struct TextOnly(Vec<&'static str>);

    impl PdfBackend for TextOnly {
        fn page_count(&self, _doc: &DocumentSource) -> Result<usize, AideError> {
            Ok(self.0.len())
        }

        fn render_page(
            &self,
            doc: &DocumentSource,
            _index: usize,
            _scale: f32,
            _max_pixels: u32,
        ) -> Result<DynamicImage, AideError> {
            Err(AideError::RenderFailed {
                name: doc.name().into(),
                detail: "no raster".into(),
            })
        }

        fn page_text(&self, _doc: &DocumentSource, index: usize) -> Result<String, AideError> {
            match self.0[index] {
                "!" => Err(AideError::Internal("bad glyphs".into())),
                t => Ok(t.to_string()),
            }
        }
    }

    fn doc() -> DocumentSource {
        DocumentSource::from_bytes("t.pdf", b"%PDF-1.4".to_vec()).unwrap()
    }

    #[tokio::test]
    async fn pages_joined_with_blank_line() {
        let text = extract_text(Arc::new(TextOnly(vec!["Intro", "Methods"])), &doc())
            .await
            .unwrap();
        assert_eq!(text, "Intro\n\nMethods");
    }

    #[test]
    fn failures_become_text_extraction_errors() {
        let err = tokio_test::block_on(extract_text(Arc::new(TextOnly(vec!["ok", "!"])), &doc()))
            .unwrap_err();
        assert!(matches!(err, AideError::TextExtractionFailed { name, .. } if name == "t.pdf"));
    }
}
