//! Source-document loading: normalise a user-supplied path or URL into an
//! in-memory [`SourceDocument`] with a stable content identity.
//!
//! ## Why load fully into memory?
//!
//! The OCR service takes the whole document in one exchange, so the bytes
//! are needed contiguously anyway; loading up front also lets us compute the
//! content digest once and use it as the cache key and the figure-directory
//! name for the rest of the run.

use crate::error::ExtractionError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Recognised input kinds, sniffed from the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

/// An immutable, loaded source document.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// SHA-256 of the raw bytes, lowercase hex. Stable across runs and
    /// machines; used as the extraction-cache key and the
    /// content-addressed figure directory name.
    pub identity: String,
    /// Where the bytes came from (path or URL), for messages only.
    pub origin: String,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
    /// Best-effort page count hint, scanned from the raw bytes at load
    /// time. The authoritative count comes from the OCR response; this hint
    /// only feeds log lines before extraction runs.
    pub page_count: Option<usize>,
}

impl SourceDocument {
    /// Load from raw bytes (e.g. an upload) with an origin label.
    pub fn from_bytes(bytes: Vec<u8>, origin: impl Into<String>) -> Self {
        let identity = digest_hex(&bytes);
        let kind = sniff_kind(&bytes);
        let page_count = match kind {
            DocumentKind::Pdf => count_pdf_pages(&bytes),
            DocumentKind::PlainText => None,
        };
        Self {
            identity,
            origin: origin.into(),
            kind,
            bytes,
            page_count,
        }
    }

    /// Load from a local file path.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ExtractionError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractionError::Io {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        if bytes.is_empty() {
            return Err(ExtractionError::EmptyDocument {
                identity: path.display().to_string(),
            });
        }
        let doc = Self::from_bytes(bytes, path.display().to_string());
        debug!(
            "Loaded {} ({} bytes, {:?}, ~{} pages)",
            doc.origin,
            doc.bytes.len(),
            doc.kind,
            doc.page_count.map(|n| n.to_string()).unwrap_or_else(|| "?".into())
        );
        Ok(doc)
    }

    /// Resolve a path or HTTP(S) URL to a loaded document.
    pub async fn resolve(
        input: &str,
        download_timeout_secs: u64,
    ) -> Result<Self, ExtractionError> {
        if is_url(input) {
            download(input, download_timeout_secs).await
        } else {
            Self::from_path(input).await
        }
    }

    /// Short digest prefix used in run ids and directory names.
    pub fn short_id(&self) -> &str {
        &self.identity[..12.min(self.identity.len())]
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn sniff_kind(bytes: &[u8]) -> DocumentKind {
    if bytes.starts_with(b"%PDF") {
        DocumentKind::Pdf
    } else {
        DocumentKind::PlainText
    }
}

/// Count `/Type /Page` object markers, excluding the `/Pages` tree nodes.
/// Wrong for documents with compressed object streams, which is why this is
/// only a hint.
fn count_pdf_pages(bytes: &[u8]) -> Option<usize> {
    let needle: &[u8] = b"/Type /Page";
    let mut count = 0usize;
    let mut i = 0usize;
    while i + needle.len() <= bytes.len() {
        if &bytes[i..i + needle.len()] == needle {
            // Skip "/Type /Pages" tree nodes.
            let next = bytes.get(i + needle.len());
            if next != Some(&b's') {
                count += 1;
            }
            i += needle.len();
        } else {
            i += 1;
        }
    }
    (count > 0).then_some(count)
}

async fn download(url: &str, timeout_secs: u64) -> Result<SourceDocument, ExtractionError> {
    use crate::provider::ServiceError;

    info!("Downloading document from: {url}");
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| {
            ExtractionError::Service(ServiceError::Network {
                detail: e.to_string(),
            })
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExtractionError::Service(ServiceError::Timeout {
                elapsed_ms: timeout_secs * 1000,
            })
        } else {
            ExtractionError::Service(ServiceError::Network {
                detail: e.to_string(),
            })
        }
    })?;

    if !response.status().is_success() {
        return Err(ExtractionError::Service(ServiceError::Http {
            status: response.status().as_u16(),
            detail: format!("download failed for '{url}'"),
        }));
    }

    let bytes = response.bytes().await.map_err(|e| {
        ExtractionError::Service(ServiceError::Network {
            detail: e.to_string(),
        })
    })?;
    if bytes.is_empty() {
        return Err(ExtractionError::EmptyDocument {
            identity: url.to_string(),
        });
    }

    let doc = SourceDocument::from_bytes(bytes.to_vec(), url.to_string());
    info!("Downloaded {} bytes from {url}", doc.bytes.len());
    Ok(doc)
}

/// Figure-image root for a document: `<root>/<digest prefix>/`.
///
/// Content-addressed so two runs over the same bytes share cropped images
/// and a changed document never collides with stale crops.
pub fn figure_dir_for(root: &Path, doc: &SourceDocument) -> PathBuf {
    root.join(doc.short_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_stable_and_content_addressed() {
        let a = SourceDocument::from_bytes(b"hello world".to_vec(), "a.txt");
        let b = SourceDocument::from_bytes(b"hello world".to_vec(), "b.txt");
        let c = SourceDocument::from_bytes(b"hello world!".to_vec(), "c.txt");
        assert_eq!(a.identity, b.identity, "same bytes, same identity");
        assert_ne!(a.identity, c.identity, "different bytes differ");
        assert_eq!(a.identity.len(), 64, "sha-256 hex");
    }

    #[test]
    fn kind_sniffing() {
        let pdf = SourceDocument::from_bytes(b"%PDF-1.7 rest".to_vec(), "x.pdf");
        assert_eq!(pdf.kind, DocumentKind::Pdf);
        let txt = SourceDocument::from_bytes(b"Just some prose.".to_vec(), "x.txt");
        assert_eq!(txt.kind, DocumentKind::PlainText);
        assert_eq!(txt.page_count, None);
    }

    #[test]
    fn pdf_page_hint_ignores_pages_tree() {
        let bytes =
            b"%PDF-1.4 /Type /Pages ... /Type /Page ... /Type /Page end".to_vec();
        let doc = SourceDocument::from_bytes(bytes, "x.pdf");
        assert_eq!(doc.page_count, Some(2));
    }

    #[test]
    fn url_detection() {
        assert!(is_url("https://example.com/paper.pdf"));
        assert!(is_url("http://example.com/paper.pdf"));
        assert!(!is_url("/tmp/paper.pdf"));
        assert!(!is_url("paper.pdf"));
    }

    #[test]
    fn short_id_is_digest_prefix() {
        let doc = SourceDocument::from_bytes(b"abc".to_vec(), "a");
        assert_eq!(doc.short_id(), &doc.identity[..12]);
    }
}
