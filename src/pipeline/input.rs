//! Input resolution: normalise a user-supplied path or URL to PDF bytes.
//!
//! pdfium can open a document straight from a byte slice, and the request
//! builder needs the same bytes for base64 attachment, so a document is held
//! in memory as a [`DocumentSource`] once resolved. The `%PDF` magic bytes
//! are checked up front so callers get a meaningful error rather than a
//! pdfium failure halfway through rendering.

use crate::error::AideError;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// A loaded document: display name plus the raw PDF bytes.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSource {
    name: String,
    bytes: Arc<[u8]>,
}

impl DocumentSource {
    /// Wrap in-memory bytes, validating the PDF magic.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Result<Self, AideError> {
        let name = name.into();
        let bytes: Vec<u8> = bytes.into();
        check_magic(&name, &bytes)?;
        Ok(Self {
            name,
            bytes: bytes.into(),
        })
    }

    /// File name shown to the reviewer and sent as the attachment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle to the bytes, for moving into blocking tasks.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to an in-memory PDF.
///
/// If the input is a URL, download it. If the input is a local file,
/// validate it exists and is readable.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<DocumentSource, AideError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input)).await
    }
}

/// Read a local PDF, mapping I/O failures to input errors.
pub async fn resolve_local(path: &Path) -> Result<DocumentSource, AideError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => AideError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => AideError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    debug!("Resolved local PDF: {} ({} bytes)", path.display(), bytes.len());
    DocumentSource::from_bytes(name, bytes)
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<DocumentSource, AideError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| AideError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());
    DocumentSource::from_bytes(file_name_from_url(url), bytes.to_vec())
}

/// Last path segment of the URL when it looks like a file name.
fn file_name_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

fn check_magic(name: &str, bytes: &[u8]) -> Result<(), AideError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(AideError::NotAPdf {
            name: name.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}
