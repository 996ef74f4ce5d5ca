//! Error types for the slidecast pipeline.
//!
//! Every stage owns a dedicated error enum (`ExtractionError`,
//! `PlanningError`, `CompileError`, `SynthesisError`, `RenderError`,
//! `AssemblyError`) so callers can tell *which* stage failed without parsing
//! message strings. [`PipelineError`] wraps any of them together with the
//! originating [`Stage`](crate::run::Stage) for the orchestrator and CLI.
//!
//! Each stage error answers `is_transient()`:
//!
//! * **Transient** — rate limits, timeouts, 5xx responses. Retried locally
//!   by the owning stage through [`crate::retry::RetryPolicy`], never by the
//!   orchestrator.
//! * **Permanent** — bad input, auth failure, invariant violation. Propagates
//!   immediately; the run is marked `Failed` and dependent stages stop.
//!
//! The separation keeps the retry budget where the knowledge is: only the
//! component that made the external call can classify its failure.

use crate::provider::ServiceError;
use crate::run::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the Document Extractor.
///
/// `Clone` is required because a failed extraction is cached as a terminal
/// negative result for the rest of the run (see [`crate::cache`]) and must be
/// handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    /// No OCR service could be resolved from config or environment.
    #[error("OCR service is not configured.\n{hint}")]
    NotConfigured { hint: String },

    /// The external OCR service rejected the document or the call failed.
    #[error("OCR service call failed: {0}")]
    Service(#[from] ServiceError),

    /// The document produced no usable text at all.
    #[error("Document '{identity}' yielded no text content")]
    EmptyDocument { identity: String },

    /// The service response failed structural validation.
    #[error("OCR response failed validation: {detail}")]
    InvalidResponse { detail: String },

    /// Figures were required but none were found in a document long enough
    /// to be expected to have them.
    #[error(
        "No figures found in a {pages}-page document with figures enabled.\n\
         Re-run with figures disabled if the document genuinely has none."
    )]
    NoFigures { pages: usize },

    /// A cropped figure payload could not be decoded as an image.
    #[error("Figure '{id}' image payload is not a decodable image: {detail}")]
    FigureImage { id: String, detail: String },

    /// Could not write an extraction artifact to disk.
    #[error("Failed to write '{path}': {detail}")]
    Io { path: PathBuf, detail: String },
}

impl ExtractionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractionError::Service(e) if e.is_transient())
    }
}

/// Errors from the Slide Planner.
#[derive(Debug, Error)]
pub enum PlanningError {
    /// No planner model could be resolved from config or environment.
    #[error("Planner model is not configured.\n{hint}")]
    NotConfigured { hint: String },

    /// The external model call failed after the retry budget.
    #[error("Planner model call failed: {0}")]
    Service(#[from] ServiceError),

    /// The model response could not be parsed into the slide schema, even
    /// after the repair round-trip.
    #[error("Planner output unparseable after {attempts} attempt(s): {detail}")]
    Unparseable { detail: String, attempts: u32 },

    /// An exact slide count was requested and the plan still differs after
    /// the single repair round-trip. The stage fails rather than truncating
    /// or padding.
    #[error("Requested exactly {requested} slides but the plan has {produced}")]
    SlideCountMismatch { requested: usize, produced: usize },

    /// The plan's slide count falls outside the configured bound.
    #[error("Plan has {produced} slides, outside the allowed {min}\u{2013}{max} range")]
    CountOutOfBounds {
        produced: usize,
        min: usize,
        max: usize,
    },

    /// There is no text to plan from.
    #[error("Cannot plan slides from empty document text")]
    EmptyText,
}

impl PlanningError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PlanningError::Service(e) if e.is_transient())
    }
}

/// Errors from the Deck Compiler. Always permanent: the compiler is a pure
/// function and only fails on invariant violations in its input.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A plan with zero slides cannot produce a deck.
    #[error("Slide plan is empty")]
    EmptyPlan,

    /// Two slides share the same index.
    #[error("Duplicate slide index {index} in plan")]
    DuplicateIndex { index: usize },

    /// Slide indices must be 1-based and contiguous.
    #[error("Slide indices not contiguous: expected {expected}, found {found}")]
    NonContiguousIndex { expected: usize, found: usize },

    /// A slide references a figure id that does not exist in the extraction.
    #[error("Slide {slide} references unknown figure '{figure_id}'")]
    DanglingFigure { slide: usize, figure_id: String },

    /// A compiled block came out empty. Blank blocks become blank frames
    /// downstream, so this is checked here rather than discovered in the
    /// rendered output.
    #[error("Slide {index} compiled to an empty markup block")]
    EmptyBlock { index: usize },
}

impl CompileError {
    pub fn is_transient(&self) -> bool {
        false
    }
}

/// Errors from the Narration Synthesizer.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// No speech service could be resolved from config or environment.
    #[error("Speech service is not configured.\n{hint}")]
    NotConfigured { hint: String },

    /// The external TTS call failed after the retry budget.
    #[error("Speech service call failed for slide {slide}: {source}")]
    Service {
        slide: usize,
        #[source]
        source: ServiceError,
    },

    /// A slide has no narration script.
    #[error("Slide {slide} has an empty narration script")]
    EmptyScript { slide: usize },

    /// The narration script exceeds the service length limit.
    #[error("Slide {slide} narration is {len} chars, over the {max} limit")]
    ScriptTooLong { slide: usize, len: usize, max: usize },

    /// ffmpeg is missing from PATH — audio normalisation cannot run.
    #[error("ffmpeg not found on PATH.\nInstall it (e.g. `apt install ffmpeg`) and retry.")]
    FfmpegNotFound,

    /// ffmpeg normalisation failed for a clip.
    #[error("Audio normalisation failed for slide {slide}: {detail}")]
    Normalize { slide: usize, detail: String },

    /// A normalised clip probed at a non-positive duration.
    #[error("Slide {slide} audio clip has invalid duration {duration}s")]
    BadDuration { slide: usize, duration: f64 },

    /// Could not write an audio artifact to disk.
    #[error("Failed to write '{path}': {detail}")]
    Io { path: PathBuf, detail: String },
}

impl SynthesisError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SynthesisError::Service { source, .. } if source.is_transient())
    }
}

/// Errors from the Frame Renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    /// marp-cli (or its headless browser) is not installed. Kept distinct
    /// from a generic tool failure because it is the single most common
    /// environment misconfiguration and has a one-line fix.
    #[error(
        "Slide renderer not available: {detail}\n\
         Install marp-cli with `npm i -g @marp-team/marp-cli` and ensure a\n\
         headless Chromium is present (marp downloads one on first run)."
    )]
    RendererNotFound { detail: String },

    /// The rasteriser exited non-zero.
    #[error("marp-cli failed: {detail}")]
    Tool { detail: String },

    /// The rasteriser exceeded its timeout.
    #[error("Rendering timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The rasteriser produced no frames at all.
    #[error("No frame images produced in '{dir}'")]
    NoFrames { dir: PathBuf },

    /// Frame count does not match the deck's block count.
    #[error("Rendered {found} frames for a {expected}-slide deck")]
    FrameCountMismatch { expected: usize, found: usize },

    /// Could not write the deck markup or read frames.
    #[error("Failed to access '{path}': {detail}")]
    Io { path: PathBuf, detail: String },
}

impl RenderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RenderError::Timeout { .. })
    }
}

/// Errors from the Video Assembler.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// An audio clip exists with no matching frame.
    #[error("No frame image for slide {index}; cannot assemble video")]
    MissingFrame { index: usize },

    /// A frame exists with no matching audio clip.
    #[error("No audio clip for slide {index}; cannot assemble video")]
    MissingClip { index: usize },

    /// Nothing to assemble.
    #[error("No frames to assemble")]
    Empty,

    /// ffmpeg is missing from PATH.
    #[error("ffmpeg not found on PATH.\nInstall it (e.g. `apt install ffmpeg`) and retry.")]
    FfmpegNotFound,

    /// The muxer exited non-zero.
    #[error("ffmpeg failed: {detail}")]
    Muxer { detail: String },

    /// The muxer exceeded its timeout.
    #[error("Assembly timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Could not write an assembly artifact to disk.
    #[error("Failed to write '{path}': {detail}")]
    Io { path: PathBuf, detail: String },
}

impl AssemblyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AssemblyError::Timeout { .. })
    }
}

/// Top-level pipeline error: a stage error plus which stage produced it.
///
/// Returned by [`crate::orchestrate::Orchestrator::run`]. The CLI prints
/// the stage and kind and uses [`is_transient`](Self::is_transient) to tell
/// the user whether a plain re-run is likely to help.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("deck compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("narration synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("frame rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("video assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    /// The run was cancelled between stages.
    #[error("run cancelled before {stage} completed")]
    Cancelled { stage: Stage },

    /// Configuration was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Run-directory bookkeeping failed.
    #[error("failed to prepare run directory '{path}': {detail}")]
    RunDir { path: PathBuf, detail: String },
}

impl PipelineError {
    /// The stage that produced this error, when one did.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Extraction(_) => Some(Stage::Extracting),
            PipelineError::Planning(_) => Some(Stage::Planning),
            PipelineError::Compile(_) => Some(Stage::Compiling),
            PipelineError::Synthesis(_) => Some(Stage::Narrating),
            PipelineError::Render(_) => Some(Stage::Rendering),
            PipelineError::Assembly(_) => Some(Stage::Assembling),
            PipelineError::Cancelled { stage } => Some(*stage),
            _ => None,
        }
    }

    /// Whether a plain re-run (same input, same config) could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Extraction(e) => e.is_transient(),
            PipelineError::Planning(e) => e.is_transient(),
            PipelineError::Compile(e) => e.is_transient(),
            PipelineError::Synthesis(e) => e.is_transient(),
            PipelineError::Render(e) => e.is_transient(),
            PipelineError::Assembly(e) => e.is_transient(),
            _ => false,
        }
    }
}
