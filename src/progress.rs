//! Progress-callback trait for run and per-slide events.
//!
//! Inject an `Arc<dyn PipelineProgressCallback>` via
//! [`crate::config::PipelineConfigBuilder::progress`] to receive events as
//! the orchestrator moves through stages and the synthesizer works through
//! slides. Callbacks are the least-invasive integration point: the CLI
//! forwards them to a terminal progress bar, a server could forward them to
//! a WebSocket, and the library stays ignorant of both.

use crate::run::Stage;
use std::sync::Arc;

/// Called by the pipeline as a run progresses.
///
/// Implementations must be `Send + Sync`: narration events fire concurrently
/// when `concurrency > 1`. All methods default to no-ops so callers only
/// override what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once when the orchestrator accepts the run.
    fn on_run_start(&self, run_id: &str) {
        let _ = run_id;
    }

    /// Called when a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finishes successfully.
    fn on_stage_complete(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage fails (after its own retries).
    fn on_stage_failed(&self, stage: Stage, error: String) {
        let _ = (stage, error);
    }

    /// Called before each slide's TTS request.
    fn on_narration_start(&self, slide: usize, total: usize) {
        let _ = (slide, total);
    }

    /// Called when a slide's clip is normalised and probed.
    fn on_narration_complete(&self, slide: usize, total: usize, duration_secs: f64) {
        let _ = (slide, total, duration_secs);
    }

    /// Called once at run end.
    fn on_run_complete(&self, success: bool) {
        let _ = success;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in
/// [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        stages: AtomicUsize,
        narrations: AtomicUsize,
    }

    impl PipelineProgressCallback for Counting {
        fn on_stage_complete(&self, _stage: Stage) {
            self.stages.fetch_add(1, Ordering::SeqCst);
        }
        fn on_narration_complete(&self, _slide: usize, _total: usize, _duration: f64) {
            self.narrations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start("run-1");
        cb.on_stage_start(Stage::Extracting);
        cb.on_stage_complete(Stage::Extracting);
        cb.on_stage_failed(Stage::Planning, "boom".into());
        cb.on_narration_start(1, 5);
        cb.on_narration_complete(1, 5, 3.2);
        cb.on_run_complete(true);
    }

    #[test]
    fn counting_callback_receives_events() {
        let cb = Counting {
            stages: AtomicUsize::new(0),
            narrations: AtomicUsize::new(0),
        };
        cb.on_stage_complete(Stage::Extracting);
        cb.on_stage_complete(Stage::Planning);
        cb.on_narration_complete(1, 3, 2.0);
        assert_eq!(cb.stages.load(Ordering::SeqCst), 2);
        assert_eq!(cb.narrations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_run_start("run-2");
        cb.on_run_complete(false);
    }
}
