//! # slidecast
//!
//! Turn a long-form document (PDF or plain text) into a narrated video
//! slide deck.
//!
//! ## Why this crate?
//!
//! Reading a forty-page document is an hour; watching a five-minute narrated
//! deck of it is not. slidecast chains the external services and tools that
//! each do one part well — a document-understanding (OCR) API, an LLM for
//! slide planning, a TTS API, the marp rasteriser, and ffmpeg — and owns the
//! part none of them do: sequencing the stages, caching the expensive calls,
//! tolerating partial failures, and guaranteeing each stage's output meets
//! the next stage's input contract.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document
//!  │
//!  ├─ 1. Extract   one OCR exchange per document (cached, coalesced)
//!  ├─ 2. Plan      LLM slide planning, compacted prompt, 1 repair round-trip
//!  ├─ 3. Compile   pure plan → Marp markup, hard structural invariants
//!  ├─ 4. Render    marp-cli → one PNG frame per slide        ┐ concurrent
//!  ├─ 5. Narrate   TTS per slide + mandatory normalisation   ┘
//!  └─ 6. Assemble  ffmpeg mux: frame i shown for clip i's duration
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slidecast::{convert, PipelineConfig, SlideCountTarget};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credentials auto-detected from SLIDECAST_*_API_KEY / MISTRAL_API_KEY /
//!     // GEMINI_API_KEY / SARVAM_API_KEY.
//!     let config = PipelineConfig::builder()
//!         .target_slides(SlideCountTarget::Exactly(7))
//!         .build()?;
//!     let report = convert("paper.pdf", &config, "runs").await?;
//!     println!("video: {:?}", report.video);
//!     println!("{} slides, {:.1}s narration", report.slide_count, report.narration_secs);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `slidecast` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! slidecast = { version = "0.1", default-features = false }
//! ```
//!
//! ## External requirements
//!
//! Rendering needs `marp-cli` (`npm i -g @marp-team/marp-cli`); narration
//! and assembly need `ffmpeg`/`ffprobe` on PATH. A missing renderer or
//! muxer is reported as a distinct, actionable error — see
//! [`RenderError::RendererNotFound`] and [`AssemblyError::FfmpegNotFound`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod orchestrate;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod retry;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifact::{AudioClip, Figure, FrameImage, RunDir};
pub use cache::ExtractionCache;
pub use config::{PipelineConfig, PipelineConfigBuilder, SlideCountTarget, MAX_SLIDES, MIN_SLIDES};
pub use document::{DocumentKind, SourceDocument};
pub use error::{
    AssemblyError, CompileError, ExtractionError, PipelineError, PlanningError, RenderError,
    SynthesisError,
};
pub use orchestrate::{convert, CancelHandle, Orchestrator};
pub use pipeline::compile::{compile, DeckDocument};
pub use pipeline::extract::{DocumentExtractor, Extract, ExtractionResult};
pub use pipeline::plan::{Slide, SlidePlan, SlidePlanner};
pub use pipeline::synth::NarrationSynthesizer;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use provider::{
    Credentials, OcrService, PlannerModel, ServiceError, SpeechService,
};
pub use retry::RetryPolicy;
pub use run::{PipelineRun, RunReport, RunState, Stage, StageStatus};
