//! Document extraction: one OCR-service exchange per document, structural
//! validation, and cropped-figure persistence.
//!
//! The extractor is the only component that talks to the
//! document-understanding service. Its output is memoized by
//! [`crate::cache::ExtractionCache`], so text-requesters and
//! figure-requesters share a single exchange.
//!
//! ## Determinism
//!
//! The service is not deterministic across calls. Within a run the cache
//! makes this moot; across runs the extractor records the text digest next
//! to the content-addressed figure directory and logs a warning when a
//! fresh extraction of the same bytes drifts from the previous one. Drift
//! is never an error.

use crate::artifact::Figure;
use crate::config::PipelineConfig;
use crate::document::{figure_dir_for, SourceDocument};
use crate::error::ExtractionError;
use crate::provider::{OcrService, ServiceError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Seam between the cache and the extractor, so the cache (and its tests)
/// need not know how extraction is performed.
#[async_trait]
pub trait Extract: Send + Sync {
    async fn extract(&self, doc: &SourceDocument) -> Result<ExtractionResult, ExtractionError>;
}

/// Normalised output of one document extraction.
///
/// Owned by the cache for the rest of the run; stages receive it behind an
/// `Arc` and never mutate it.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// Markdown-like text, page-ordered, pages joined by blank lines.
    pub text: String,
    /// Figures in document order. Every `image_path` exists on disk.
    pub figures: Vec<Figure>,
    /// Page count as reported by the service.
    pub page_count: usize,
}

impl ExtractionResult {
    /// Look up a figure by service id.
    pub fn figure(&self, id: &str) -> Option<&Figure> {
        self.figures.iter().find(|f| f.id == id)
    }
}

/// Drives the external OCR service and validates its response.
pub struct DocumentExtractor {
    service: Arc<dyn OcrService>,
    /// Root for content-addressed figure directories.
    figures_root: PathBuf,
    figures_enabled: bool,
    min_pages_for_figures: usize,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl DocumentExtractor {
    pub fn new(
        service: Arc<dyn OcrService>,
        figures_root: impl Into<PathBuf>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            service,
            figures_root: figures_root.into(),
            figures_enabled: config.figures_enabled,
            min_pages_for_figures: config.min_pages_for_figures,
            retry: config.retry_policy(),
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

#[async_trait]
impl Extract for DocumentExtractor {
    async fn extract(&self, doc: &SourceDocument) -> Result<ExtractionResult, ExtractionError> {
        let response = self
            .retry
            .run("ocr", |_| async move {
                match tokio::time::timeout(
                    self.call_timeout,
                    self.service.read_document(&doc.bytes, self.figures_enabled),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ServiceError::Timeout {
                        elapsed_ms: self.call_timeout.as_millis() as u64,
                    }),
                }
            })
            .await
            .map_err(ExtractionError::Service)?;

        let mut pages = response.pages;
        if pages.is_empty() {
            return Err(ExtractionError::InvalidResponse {
                detail: "response has no pages".into(),
            });
        }
        if pages.iter().any(|p| p.page == 0) {
            return Err(ExtractionError::InvalidResponse {
                detail: "page numbers must be 1-based".into(),
            });
        }
        // Page order is an output contract; the service is not trusted to
        // deliver it.
        pages.sort_by_key(|p| p.page);
        let page_count = pages.len();

        let text = pages
            .iter()
            .map(|p| p.markdown.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if text.is_empty() {
            return Err(ExtractionError::EmptyDocument {
                identity: doc.origin.clone(),
            });
        }

        let figure_dir = figure_dir_for(&self.figures_root, doc);
        let mut figures = Vec::new();
        if self.figures_enabled {
            std::fs::create_dir_all(&figure_dir).map_err(|e| ExtractionError::Io {
                path: figure_dir.clone(),
                detail: e.to_string(),
            })?;

            let mut number = 1usize;
            for page in &pages {
                for img in &page.images {
                    let figure =
                        write_figure(&figure_dir, page.page, &page.markdown, number, img)?;
                    figures.push(figure);
                    number += 1;
                }
            }

            if figures.is_empty() && page_count >= self.min_pages_for_figures {
                return Err(ExtractionError::NoFigures { pages: page_count });
            }
        }

        check_drift(&figure_dir, &text);

        info!(
            "Extracted {} pages, {} figures from {}",
            page_count,
            figures.len(),
            doc.short_id()
        );
        Ok(ExtractionResult {
            text,
            figures,
            page_count,
        })
    }
}

/// Decode, validate, and persist one cropped figure, then build its record.
///
/// The image file is written and decodable *before* the `Figure` exists, so
/// a `Figure` in an [`ExtractionResult`] always points at a real file.
fn write_figure(
    dir: &std::path::Path,
    page: usize,
    page_markdown: &str,
    number: usize,
    img: &crate::provider::OcrImage,
) -> Result<Figure, ExtractionError> {
    let bytes = STANDARD
        .decode(&img.image_base64)
        .map_err(|e| ExtractionError::FigureImage {
            id: img.id.clone(),
            detail: format!("invalid base64: {e}"),
        })?;

    let decoded =
        image::load_from_memory(&bytes).map_err(|e| ExtractionError::FigureImage {
            id: img.id.clone(),
            detail: e.to_string(),
        })?;

    let path = dir.join(format!("figure-{number}.png"));
    decoded
        .save_with_format(&path, image::ImageFormat::Png)
        .map_err(|e| ExtractionError::Io {
            path: path.clone(),
            detail: e.to_string(),
        })?;

    let (title, caption) = figure_info_from_markdown(page_markdown, number);
    debug!("figure {number} ({}) -> {}", img.id, path.display());

    Ok(Figure {
        id: img.id.clone(),
        number,
        page,
        region: img.bbox,
        title,
        caption,
        image_path: path,
    })
}

/// Recover a figure's title and caption from the surrounding page text.
///
/// Looks for `Figure N: …` / `Fig. N …` references, preferring the exact
/// figure number, then any figure reference on the page. Falls back to
/// generic labels; a missing caption never fails extraction.
fn figure_info_from_markdown(markdown: &str, number: usize) -> (String, String) {
    let mut title = format!("Figure {number}");
    let mut caption = String::from("Figure extracted from document");

    let patterns = [
        format!(r"(?i)Figure\s+{number}[:.]?\s*([^\n]+)"),
        format!(r"(?i)Fig\.\s+{number}[:.]?\s*([^\n]+)"),
        r"(?i)Figure\s+\d+[:.]?\s*([^\n]+)".to_string(),
        r"(?i)Fig\.\s+\d+[:.]?\s*([^\n]+)".to_string(),
    ];

    for pattern in &patterns {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(_) => continue,
        };
        if let Some(caps) = re.captures(markdown) {
            let found = caps[1].trim().to_string();
            if found.is_empty() {
                continue;
            }
            if found.len() < 50 {
                title = format!("Figure {number}: {found}");
            } else if let Some(first) = found.split('.').next().filter(|s| !s.is_empty()) {
                title = format!("Figure {number}: {first}");
                caption = found;
            } else {
                caption = found;
            }
            break;
        }
    }

    (title, caption)
}

/// Compare the fresh text digest against the one recorded by a previous run
/// over the same bytes. Drift is logged, never raised: the service is known
/// to be non-deterministic.
fn check_drift(figure_dir: &std::path::Path, text: &str) {
    let digest: String = {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    };

    let marker = figure_dir.join("extraction.digest");
    if let Ok(previous) = std::fs::read_to_string(&marker) {
        if previous.trim() != digest {
            warn!(
                "extraction drift for {}: previous {} vs current {}",
                figure_dir.display(),
                &previous.trim()[..12.min(previous.trim().len())],
                &digest[..12]
            );
        }
    }
    // Best effort; a read-only figure root only disables drift detection.
    let _ = std::fs::write(&marker, &digest);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{OcrImage, OcrPage, OcrResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 1x1 red PNG, the smallest payload `image` will decode.
    fn tiny_png_base64() -> String {
        let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            1,
            1,
            image::Rgba([255, 0, 0, 255]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        STANDARD.encode(buf)
    }

    struct FakeOcr {
        pages: Vec<OcrPage>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OcrService for FakeOcr {
        async fn read_document(
            &self,
            _bytes: &[u8],
            _include_images: bool,
        ) -> Result<OcrResponse, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(OcrResponse {
                pages: self.pages.clone(),
            })
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::builder()
            .min_pages_for_figures(3)
            .build()
            .unwrap()
    }

    fn doc() -> SourceDocument {
        SourceDocument::from_bytes(b"%PDF-1.4 fake".to_vec(), "test.pdf")
    }

    fn page(n: usize, markdown: &str, images: Vec<OcrImage>) -> OcrPage {
        OcrPage {
            page: n,
            markdown: markdown.to_string(),
            images,
        }
    }

    #[tokio::test]
    async fn pages_are_reordered_and_joined() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Arc::new(FakeOcr {
            pages: vec![
                page(2, "Second page.", vec![]),
                page(1, "First page.", vec![]),
            ],
            calls: AtomicUsize::new(0),
        });
        let extractor = DocumentExtractor::new(service, tmp.path(), &config());

        let result = extractor.extract(&doc()).await.unwrap();
        assert_eq!(result.page_count, 2);
        assert!(result.text.starts_with("First page."));
        assert!(result.text.ends_with("Second page."));
    }

    #[tokio::test]
    async fn empty_response_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Arc::new(FakeOcr {
            pages: vec![],
            calls: AtomicUsize::new(0),
        });
        let extractor = DocumentExtractor::new(service, tmp.path(), &config());
        let err = extractor.extract(&doc()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn figures_written_before_records_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Arc::new(FakeOcr {
            pages: vec![page(
                1,
                "Intro. Figure 1: Throughput over time.",
                vec![OcrImage {
                    id: "img-0".into(),
                    bbox: [10.0, 10.0, 200.0, 120.0],
                    image_base64: tiny_png_base64(),
                }],
            )],
            calls: AtomicUsize::new(0),
        });
        let extractor = DocumentExtractor::new(service, tmp.path(), &config());

        let result = extractor.extract(&doc()).await.unwrap();
        assert_eq!(result.figures.len(), 1);
        let fig = &result.figures[0];
        assert!(fig.image_path.exists(), "image written before record");
        assert_eq!(fig.page, 1);
        assert_eq!(fig.title, "Figure 1: Throughput over time.");
        assert!(result.figure("img-0").is_some());
        assert!(result.figure("img-9").is_none());
    }

    #[tokio::test]
    async fn long_document_without_figures_fails_when_required() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Arc::new(FakeOcr {
            pages: (1..=4).map(|n| page(n, "Prose only.", vec![])).collect(),
            calls: AtomicUsize::new(0),
        });
        let extractor = DocumentExtractor::new(service, tmp.path(), &config());

        let err = extractor.extract(&doc()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::NoFigures { pages: 4 }));
    }

    #[tokio::test]
    async fn short_document_without_figures_is_fine() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Arc::new(FakeOcr {
            pages: vec![page(1, "One pager.", vec![])],
            calls: AtomicUsize::new(0),
        });
        let extractor = DocumentExtractor::new(service, tmp.path(), &config());
        let result = extractor.extract(&doc()).await.unwrap();
        assert!(result.figures.is_empty());
    }

    #[tokio::test]
    async fn figures_skipped_when_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Arc::new(FakeOcr {
            pages: (1..=5).map(|n| page(n, "Prose.", vec![])).collect(),
            calls: AtomicUsize::new(0),
        });
        let cfg = PipelineConfig::builder()
            .figures_enabled(false)
            .build()
            .unwrap();
        let extractor = DocumentExtractor::new(service, tmp.path(), &cfg);
        let result = extractor.extract(&doc()).await.unwrap();
        assert!(result.figures.is_empty());
    }

    #[tokio::test]
    async fn undecodable_figure_payload_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let service = Arc::new(FakeOcr {
            pages: vec![page(
                1,
                "Text",
                vec![OcrImage {
                    id: "img-0".into(),
                    bbox: [0.0; 4],
                    image_base64: STANDARD.encode(b"not an image"),
                }],
            )],
            calls: AtomicUsize::new(0),
        });
        let extractor = DocumentExtractor::new(service, tmp.path(), &config());
        let err = extractor.extract(&doc()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::FigureImage { .. }));
    }

    #[test]
    fn caption_longer_than_title_budget_splits() {
        let markdown = "Figure 2: A very long caption that goes on and on, well past the \
                        fifty character budget. It has a second sentence too.";
        let (title, caption) = figure_info_from_markdown(markdown, 2);
        assert!(title.starts_with("Figure 2: A very long caption"));
        assert!(caption.contains("second sentence"));
    }

    #[test]
    fn no_reference_falls_back_to_generic_labels() {
        let (title, caption) = figure_info_from_markdown("No figures mentioned here.", 3);
        assert_eq!(title, "Figure 3");
        assert_eq!(caption, "Figure extracted from document");
    }
}
