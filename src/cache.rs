//! Extraction cache: at most one external OCR call per document identity.
//!
//! Text and figures are consumed by different stages at different times, but
//! both come from the same expensive service exchange. The cache guarantees
//! one call per document per run regardless of who asks first or how
//! requests interleave.
//!
//! ## Concurrency
//!
//! Each key owns a `tokio::sync::OnceCell`. The first caller initialises it
//! by running the extraction; concurrent callers for the same key await the
//! same cell and all receive the shared result. The map lock is held only
//! while looking up or inserting the cell, never across the extraction.
//!
//! ## Negative caching
//!
//! A failed extraction is stored as a terminal result for the remainder of
//! the run. Retrying transient service errors is the extractor's job, with
//! a bounded budget; by the time a failure reaches the cache it is final,
//! and handing it to later callers avoids a silent retry loop burning the
//! same external budget again. Tooling can [`clear`](ExtractionCache::clear)
//! or [`remove`](ExtractionCache::remove) entries to force a fresh attempt.

use crate::document::SourceDocument;
use crate::error::ExtractionError;
use crate::pipeline::extract::{Extract, ExtractionResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::debug;

type Entry = Arc<OnceCell<Result<Arc<ExtractionResult>, ExtractionError>>>;

/// Memoizes [`Extract::extract`] per document identity.
///
/// Constructed explicitly and passed to the orchestrator; its lifetime is
/// whatever the caller chooses (single run, or a long-lived process serving
/// many runs). Never a process-wide singleton.
pub struct ExtractionCache {
    extractor: Arc<dyn Extract>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ExtractionCache {
    pub fn new(extractor: Arc<dyn Extract>) -> Self {
        Self {
            extractor,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the cached extraction for `doc`, running it if absent.
    ///
    /// Concurrent callers for the same identity coalesce onto one in-flight
    /// extraction; all of them receive the same `Arc`'d result or the same
    /// terminal error.
    pub async fn get_or_extract(
        &self,
        doc: &SourceDocument,
    ) -> Result<Arc<ExtractionResult>, ExtractionError> {
        let cell = {
            let mut entries = self.entries.lock().expect("cache lock");
            Arc::clone(
                entries
                    .entry(doc.identity.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let result = cell
            .get_or_init(|| async move {
                debug!("extraction cache miss for {}", doc.short_id());
                self.extractor.extract(doc).await.map(Arc::new)
            })
            .await;

        result.clone()
    }

    /// Drop every cached entry. Subsequent requests extract afresh.
    pub fn clear(&self) {
        self.entries.lock().expect("cache lock").clear();
    }

    /// Drop the entry for one document identity, if present.
    pub fn remove(&self, identity: &str) {
        self.entries.lock().expect("cache lock").remove(identity);
    }

    /// Number of cached identities (including terminal failures).
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
