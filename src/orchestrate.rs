//! Pipeline orchestration: drive the stages in dependency order.
//!
//! ```text
//! Queued → Extracting → Planning → Compiling → Rendering ─┐
//!                                          └→ Narrating ──┴→ Assembling → Done
//! ```
//!
//! `Rendering` and `Narrating` are independent and run concurrently once
//! compilation and planning have completed; `Assembling` needs both.
//! `Failed` is reachable from every non-terminal state. Slides-only runs
//! terminate after `Rendering`.
//!
//! ## Failure policy
//!
//! Retries happen *inside* stages (each owns a
//! [`crate::retry::RetryPolicy`]); the orchestrator never re-runs a stage.
//! On failure it records the originating stage and error kind, lets the
//! concurrently-running independent stage finish, keeps partial artifacts
//! on disk unless configured otherwise, and persists `run.json` so tooling
//! can resume from the failed stage.

use crate::artifact::RunDir;
use crate::cache::ExtractionCache;
use crate::config::PipelineConfig;
use crate::document::SourceDocument;
use crate::error::{PipelineError, PlanningError, SynthesisError};
use crate::pipeline::assemble::VideoAssembler;
use crate::pipeline::compile::compile;
use crate::pipeline::extract::DocumentExtractor;
use crate::pipeline::plan::SlidePlanner;
use crate::pipeline::render::FrameRenderer;
use crate::pipeline::synth::NarrationSynthesizer;
use crate::provider::{resolve_ocr, resolve_planner, resolve_speech};
use crate::run::{PipelineRun, RunReport, Stage};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

static RUN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Cooperative cancellation flag, checked between stages.
///
/// A stage already dispatched to an external service or tool is allowed to
/// complete or time out; cancellation takes effect at the next stage
/// boundary.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives one document through the pipeline.
///
/// The extraction cache is injected at construction — callers decide
/// whether it lives for one run or for a long-lived process serving many.
pub struct Orchestrator {
    config: PipelineConfig,
    cache: Arc<ExtractionCache>,
    out_root: PathBuf,
    cancel: CancelHandle,
}

impl Orchestrator {
    /// Build with an explicit cache (and therefore an explicit extractor).
    pub fn new(
        config: PipelineConfig,
        cache: Arc<ExtractionCache>,
        out_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            cache,
            out_root: out_root.into(),
            cancel: CancelHandle::new(),
        }
    }

    /// Build the extractor and cache from the config's OCR provider.
    pub fn from_config(
        config: PipelineConfig,
        out_root: impl Into<PathBuf>,
    ) -> Result<Self, PipelineError> {
        let out_root = out_root.into();
        let ocr = resolve_ocr(
            config.ocr.as_ref(),
            &config.credentials,
            config.api_timeout_secs,
        )
        .map_err(|hint| {
            PipelineError::Extraction(crate::error::ExtractionError::NotConfigured { hint })
        })?;
        let extractor = Arc::new(DocumentExtractor::new(
            ocr,
            out_root.join("figures"),
            &config,
        ));
        let cache = Arc::new(ExtractionCache::new(extractor));
        Ok(Self::new(config, cache, out_root))
    }

    /// Handle for cancelling this orchestrator's runs between stages.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Execute the pipeline for one document.
    ///
    /// Artifacts land in `<out_root>/<run id>/`. On failure the partial
    /// artifacts and `run.json` stay on disk for diagnostics unless
    /// `cleanup_on_failure` is set.
    pub async fn run(&self, document: &SourceDocument) -> Result<RunReport, PipelineError> {
        let total_start = Instant::now();
        let run_id = format!(
            "{}-{:04}",
            document.short_id(),
            RUN_COUNTER.fetch_add(1, Ordering::SeqCst)
        );
        let run_dir =
            RunDir::create(self.out_root.join(&run_id)).map_err(|e| PipelineError::RunDir {
                path: self.out_root.join(&run_id),
                detail: e.to_string(),
            })?;

        let mut record = PipelineRun::new(&run_id, &document.identity, self.config.slides_only);
        if let Some(cb) = &self.config.progress {
            cb.on_run_start(&run_id);
        }
        info!("run {run_id}: {} ({:?})", document.origin, self.config.target_slides);

        let result = self
            .drive(document, &run_dir, &mut record, total_start)
            .await;

        record.finish();
        self.persist_record(&run_dir, &record);

        match result {
            Ok(report) => {
                if let Some(cb) = &self.config.progress {
                    cb.on_run_complete(true);
                }
                info!("run {run_id} done in {}ms", report.total_ms);
                Ok(report)
            }
            Err(e) => {
                if let Some(cb) = &self.config.progress {
                    cb.on_run_complete(false);
                }
                if self.config.cleanup_on_failure {
                    let _ = std::fs::remove_dir_all(run_dir.root());
                } else if record.has_partial_artifacts() {
                    info!(
                        "run {run_id} failed; {} partial artifact(s) kept under {}",
                        record.artifacts.len(),
                        run_dir.root().display()
                    );
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        document: &SourceDocument,
        run_dir: &RunDir,
        record: &mut PipelineRun,
        total_start: Instant,
    ) -> Result<RunReport, PipelineError> {
        let progress = self.config.progress.clone();

        // ── Stage: Extracting (cached) ───────────────────────────────────
        self.check_cancelled(record, Stage::Extracting)?;
        self.stage_start(record, Stage::Extracting);
        let stage_t = Instant::now();
        let extraction = match self.cache.get_or_extract(document).await {
            Ok(v) => v,
            Err(e) => return Err(self.stage_fail(record, Stage::Extracting, e.into())),
        };
        self.write_sidecar(record, run_dir.text_path(), extraction.text.as_bytes())?;
        self.write_sidecar(
            record,
            run_dir.figures_path(),
            serde_json::to_string_pretty(&extraction.figures)
                .unwrap_or_default()
                .as_bytes(),
        )?;
        for figure in &extraction.figures {
            record.record_artifact(&figure.image_path);
        }
        self.stage_done(record, Stage::Extracting, stage_t);

        // ── Stage: Planning ──────────────────────────────────────────────
        self.check_cancelled(record, Stage::Planning)?;
        self.stage_start(record, Stage::Planning);
        let stage_t = Instant::now();
        let planner_model = match resolve_planner(
            self.config.planner.as_ref(),
            &self.config.credentials,
            self.config.api_timeout_secs,
        ) {
            Ok(m) => m,
            Err(hint) => {
                return Err(self.stage_fail(
                    record,
                    Stage::Planning,
                    PlanningError::NotConfigured { hint }.into(),
                ))
            }
        };
        let planner = SlidePlanner::new(planner_model, &self.config);
        let plan = match planner
            .plan(
                &extraction.text,
                &extraction.figures,
                self.config.target_slides,
            )
            .await
        {
            Ok(p) => p,
            Err(e) => return Err(self.stage_fail(record, Stage::Planning, e.into())),
        };
        self.write_sidecar(
            record,
            run_dir.plan_path(),
            serde_json::to_string_pretty(&plan)
                .unwrap_or_default()
                .as_bytes(),
        )?;
        self.write_sidecar(
            record,
            run_dir.script_path(),
            plan.narration_script().as_bytes(),
        )?;
        self.stage_done(record, Stage::Planning, stage_t);

        // ── Stage: Compiling (pure) ──────────────────────────────────────
        self.check_cancelled(record, Stage::Compiling)?;
        self.stage_start(record, Stage::Compiling);
        let stage_t = Instant::now();
        let deck = match compile(&plan, &extraction.figures) {
            Ok(d) => d,
            Err(e) => return Err(self.stage_fail(record, Stage::Compiling, e.into())),
        };
        self.stage_done(record, Stage::Compiling, stage_t);

        // ── Stages: Rendering ∥ Narrating ────────────────────────────────
        // Both inputs are ready; run them concurrently. If one fails, the
        // other still runs to completion so its artifacts are available for
        // a retry-from-stage.
        self.check_cancelled(record, Stage::Rendering)?;
        let renderer = FrameRenderer::new(&self.config);
        self.stage_start(record, Stage::Rendering);
        let render_t = Instant::now();

        let (frames_result, clips_result) = if self.config.slides_only {
            (renderer.render(&deck, run_dir).await, Ok(Vec::new()))
        } else {
            self.stage_start(record, Stage::Narrating);
            let speech = match resolve_speech(
                self.config.speech.as_ref(),
                &self.config.credentials,
                self.config.api_timeout_secs,
            ) {
                Ok(s) => s,
                Err(hint) => {
                    return Err(self.stage_fail(
                        record,
                        Stage::Narrating,
                        SynthesisError::NotConfigured { hint }.into(),
                    ))
                }
            };
            let synthesizer = NarrationSynthesizer::new(speech, &self.config);
            tokio::join!(
                renderer.render(&deck, run_dir),
                synthesizer.synthesize_all(&plan, run_dir, progress.as_ref()),
            )
        };

        record.record_artifact(run_dir.deck_path());
        let frames = match frames_result {
            Ok(frames) => {
                for frame in &frames {
                    record.record_artifact(&frame.path);
                }
                self.stage_done(record, Stage::Rendering, render_t);
                frames
            }
            Err(e) => {
                // Narration ran independently; keep its artifacts and its
                // status so a retry can start from rendering.
                if !self.config.slides_only {
                    if let Ok(clips) = &clips_result {
                        for clip in clips {
                            record.record_artifact(&clip.path);
                        }
                        record.stage_done(Stage::Narrating, render_t.elapsed().as_millis() as u64);
                    }
                }
                return Err(self.stage_fail(record, Stage::Rendering, e.into()));
            }
        };

        let clips = if self.config.slides_only {
            Vec::new()
        } else {
            match clips_result {
                Ok(clips) => {
                    for clip in &clips {
                        record.record_artifact(&clip.path);
                    }
                    self.stage_done(record, Stage::Narrating, render_t);
                    clips
                }
                Err(e) => return Err(self.stage_fail(record, Stage::Narrating, e.into())),
            }
        };

        // ── Stage: Assembling (skipped in slides-only) ───────────────────
        let video = if self.config.slides_only {
            None
        } else {
            self.check_cancelled(record, Stage::Assembling)?;
            self.stage_start(record, Stage::Assembling);
            let stage_t = Instant::now();
            let assembler = VideoAssembler::new(&self.config);
            let video = match assembler.assemble(&frames, &clips, run_dir).await {
                Ok(v) => v,
                Err(e) => return Err(self.stage_fail(record, Stage::Assembling, e.into())),
            };
            record.record_artifact(&video);
            self.stage_done(record, Stage::Assembling, stage_t);
            Some(video)
        };

        Ok(RunReport {
            run_id: record.id.clone(),
            document: document.identity.clone(),
            video,
            deck: run_dir.deck_path(),
            frames: frames.iter().map(|f| f.path.clone()).collect(),
            clips: clips.iter().map(|c| c.path.clone()).collect(),
            slide_count: plan.len(),
            figure_count: extraction.figures.len(),
            narration_secs: clips.iter().map(|c| c.duration_secs).sum(),
            stage_ms: record.stage_ms.clone(),
            total_ms: total_start.elapsed().as_millis() as u64,
        })
    }

    // ── Bookkeeping helpers ──────────────────────────────────────────────

    fn check_cancelled(
        &self,
        record: &mut PipelineRun,
        stage: Stage,
    ) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            record.stage_failed(stage, "cancelled".into());
            return Err(PipelineError::Cancelled { stage });
        }
        Ok(())
    }

    fn stage_start(&self, record: &mut PipelineRun, stage: Stage) {
        record.stage_started(stage);
        if let Some(cb) = &self.config.progress {
            cb.on_stage_start(stage);
        }
    }

    fn stage_done(&self, record: &mut PipelineRun, stage: Stage, started: Instant) {
        record.stage_done(stage, started.elapsed().as_millis() as u64);
        if let Some(cb) = &self.config.progress {
            cb.on_stage_complete(stage);
        }
    }

    fn stage_fail(
        &self,
        record: &mut PipelineRun,
        stage: Stage,
        error: PipelineError,
    ) -> PipelineError {
        record.stage_failed(stage, error.to_string());
        if let Some(cb) = &self.config.progress {
            cb.on_stage_failed(stage, error.to_string());
        }
        warn!("{stage} failed: {error}");
        error
    }

    fn write_sidecar(
        &self,
        record: &mut PipelineRun,
        path: PathBuf,
        contents: &[u8],
    ) -> Result<(), PipelineError> {
        std::fs::write(&path, contents).map_err(|e| PipelineError::RunDir {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        record.record_artifact(path);
        Ok(())
    }

    fn persist_record(&self, run_dir: &RunDir, record: &PipelineRun) {
        match serde_json::to_string_pretty(record) {
            Ok(json) => {
                if let Err(e) = std::fs::write(run_dir.report_path(), json) {
                    warn!("could not persist run record: {e}");
                }
            }
            Err(e) => warn!("could not serialise run record: {e}"),
        }
    }
}

/// Convert a document (path or URL) end to end with a one-shot orchestrator.
///
/// The primary entry point for library users who don't need to share an
/// extraction cache across runs.
///
/// # Example
/// ```rust,no_run
/// use slidecast::{convert, PipelineConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = PipelineConfig::default();
///     let report = convert("paper.pdf", &config, "runs").await?;
///     println!("{:?}", report.video);
///     Ok(())
/// }
/// ```
pub async fn convert(
    input: impl AsRef<str>,
    config: &PipelineConfig,
    out_root: impl Into<PathBuf>,
) -> Result<RunReport, PipelineError> {
    let document =
        SourceDocument::resolve(input.as_ref(), config.download_timeout_secs).await?;
    let orchestrator = Orchestrator::from_config(config.clone(), out_root)?;
    orchestrator.run(&document).await
}
