//! Configuration for a pipeline run.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it easy
//! to share configs across tasks, log them, and diff two runs to understand
//! why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on the
//! defaults for the rest.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use crate::provider::{Credentials, OcrService, PlannerModel, SpeechService};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Slide count bounds enforced on every plan.
pub const MIN_SLIDES: usize = 2;
pub const MAX_SLIDES: usize = 20;

/// How many slides the planner should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlideCountTarget {
    /// Let the model choose, within [`MIN_SLIDES`]–[`MAX_SLIDES`]. (default)
    #[default]
    Auto,
    /// Demand exactly this many slides. The planner gets one repair
    /// round-trip to hit the number, then the stage fails.
    Exactly(usize),
}

impl SlideCountTarget {
    /// The exact count, when one was requested.
    pub fn exact(&self) -> Option<usize> {
        match self {
            SlideCountTarget::Auto => None,
            SlideCountTarget::Exactly(n) => Some(*n),
        }
    }
}

/// Configuration for a document-to-video pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use slidecast::{PipelineConfig, SlideCountTarget};
///
/// let config = PipelineConfig::builder()
///     .target_slides(SlideCountTarget::Exactly(5))
///     .slides_only(true)
///     .concurrency(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Requested slide count. Default: [`SlideCountTarget::Auto`].
    pub target_slides: SlideCountTarget,

    /// Extract figures and offer them to the planner. Default: true.
    ///
    /// When enabled, a figure-extraction failure fails the run — the
    /// pipeline never silently degrades to "no figures".
    pub figures_enabled: bool,

    /// Stop after frame rendering: no narration, no video. Default: false.
    pub slides_only: bool,

    /// Concurrent TTS calls during narration synthesis. Default: 4.
    ///
    /// Narration is network-bound; a small fan-out cuts wall-clock time
    /// without tripping service rate limits. Lower this if the speech
    /// service returns 429s.
    pub concurrency: usize,

    /// Maximum retries per transient external failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (doubles per retry). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-service-call timeout in seconds. Default: 120.
    ///
    /// OCR of a long document is the slowest exchange in the pipeline;
    /// timeouts under a minute produce spurious transient failures.
    pub api_timeout_secs: u64,

    /// Timeout for each external tool invocation (marp-cli, ffmpeg) in
    /// seconds. Default: 300.
    pub tool_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Documents with at least this many pages are expected to contain
    /// figures when `figures_enabled` is set. Default: 3.
    pub min_pages_for_figures: usize,

    /// Narration scripts longer than this are rejected before the TTS call.
    /// Default: 3000.
    pub max_narration_chars: usize,

    /// Per-slide display seconds for fixed-duration assembly (no audio).
    /// Default: 5.0.
    pub default_slide_secs: f64,

    /// Delete partial artifacts when a run fails. Default: false — partial
    /// artifacts are kept for diagnostics and retry-from-stage.
    pub cleanup_on_failure: bool,

    /// Per-service API tokens. Fields left unset fall back to environment
    /// variables at resolution time.
    pub credentials: Credentials,

    /// Pre-built OCR service. Takes precedence over credentials.
    pub ocr: Option<Arc<dyn OcrService>>,

    /// Pre-built planner model. Takes precedence over credentials.
    pub planner: Option<Arc<dyn PlannerModel>>,

    /// Pre-built speech service. Takes precedence over credentials.
    pub speech: Option<Arc<dyn SpeechService>>,

    /// Optional progress callback for stage and per-slide events.
    pub progress: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_slides: SlideCountTarget::Auto,
            figures_enabled: true,
            slides_only: false,
            concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            tool_timeout_secs: 300,
            download_timeout_secs: 120,
            min_pages_for_figures: 3,
            max_narration_chars: 3000,
            default_slide_secs: 5.0,
            cleanup_on_failure: false,
            credentials: Credentials::default(),
            ocr: None,
            planner: None,
            speech: None,
            progress: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("target_slides", &self.target_slides)
            .field("figures_enabled", &self.figures_enabled)
            .field("slides_only", &self.slides_only)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("credentials", &self.credentials)
            .field("ocr", &self.ocr.as_ref().map(|_| "<dyn OcrService>"))
            .field("planner", &self.planner.as_ref().map(|_| "<dyn PlannerModel>"))
            .field("speech", &self.speech.as_ref().map(|_| "<dyn SpeechService>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The retry policy every external-call stage applies.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_backoff_ms)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn target_slides(mut self, target: SlideCountTarget) -> Self {
        self.config.target_slides = target;
        self
    }

    pub fn figures_enabled(mut self, v: bool) -> Self {
        self.config.figures_enabled = v;
        self
    }

    pub fn slides_only(mut self, v: bool) -> Self {
        self.config.slides_only = v;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn min_pages_for_figures(mut self, pages: usize) -> Self {
        self.config.min_pages_for_figures = pages;
        self
    }

    pub fn max_narration_chars(mut self, chars: usize) -> Self {
        self.config.max_narration_chars = chars.max(1);
        self
    }

    pub fn default_slide_secs(mut self, secs: f64) -> Self {
        self.config.default_slide_secs = secs.max(0.1);
        self
    }

    pub fn cleanup_on_failure(mut self, v: bool) -> Self {
        self.config.cleanup_on_failure = v;
        self
    }

    pub fn credentials(mut self, creds: Credentials) -> Self {
        self.config.credentials = creds;
        self
    }

    pub fn ocr(mut self, svc: Arc<dyn OcrService>) -> Self {
        self.config.ocr = Some(svc);
        self
    }

    pub fn planner(mut self, model: Arc<dyn PlannerModel>) -> Self {
        self.config.planner = Some(model);
        self
    }

    pub fn speech(mut self, svc: Arc<dyn SpeechService>) -> Self {
        self.config.speech = Some(svc);
        self
    }

    pub fn progress(mut self, cb: ProgressCallback) -> Self {
        self.config.progress = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if let Some(n) = c.target_slides.exact() {
            if !(MIN_SLIDES..=MAX_SLIDES).contains(&n) {
                return Err(PipelineError::InvalidConfig(format!(
                    "target slide count must be {MIN_SLIDES}\u{2013}{MAX_SLIDES}, got {n}"
                )));
            }
        }
        if c.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "concurrency must be \u{2265} 1".into(),
            ));
        }
        if c.default_slide_secs <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "default slide duration must be positive".into(),
            ));
        }
        Ok(self.config)
    }
}
