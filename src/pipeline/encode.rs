//! Byte encodings: the PDF as a base64 data URL, pages as PNG.
//!
//! OpenAI-compatible chat APIs accept documents as base64 data URLs embedded
//! in the JSON request body, so rich-content requests carry the whole PDF
//! this way. PNG is used for page previews because it is lossless and
//! rendered text stays crisp.

use crate::error::AideError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// MIME type used for document attachments.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Base64-encode the raw PDF bytes.
pub fn encode_pdf(bytes: &[u8]) -> String {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded PDF: {} bytes → {} bytes base64", bytes.len(), b64.len());
    b64
}

/// Wrap base64 PDF data in a `data:` URL.
pub fn pdf_data_url(data_base64: &str) -> String {
    format!("data:{PDF_MIME_TYPE};base64,{data_base64}")
}

/// Encode a rasterised page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, AideError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| AideError::Internal(format!("PNG encoding failed: {e}")))?;
    debug!(
        "Encoded {}x{} page → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}
