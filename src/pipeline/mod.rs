//! Pipeline stages for document-to-video conversion.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets us swap
//! implementations (e.g. a different renderer) without touching other
//! stages.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ plan ──▶ compile ──┬─▶ render ──┐
//! (OCR svc)  (LLM)    (pure)     │  (marp)    ├─▶ assemble
//!                                └─▶ synth ───┘   (ffmpeg)
//!                                   (TTS+ffmpeg)
//! ```
//!
//! 1. [`extract`] — one OCR exchange per document (memoized by
//!    [`crate::cache::ExtractionCache`]); writes cropped figure images
//! 2. [`plan`]    — LLM slide planning with prompt compaction and a single
//!    repair round-trip
//! 3. [`compile`] — pure plan-to-markup compilation with structural
//!    invariants
//! 4. [`render`]  — marp-cli rasterisation into ordered frame images
//! 5. [`synth`]   — per-slide TTS plus mandatory audio normalisation
//! 6. [`assemble`] — ffmpeg muxing of frames and clips into the final video
//!
//! [`proc`] wraps external tool invocation (spawn, timeout, stderr capture)
//! for the three stages that shell out.

pub mod assemble;
pub mod compile;
pub mod extract;
pub mod plan;
pub mod proc;
pub mod render;
pub mod synth;
