//! Per-run bookkeeping: the stage state machine and the run report.
//!
//! A [`PipelineRun`] is created when the orchestrator accepts a document and
//! is mutated only by the orchestrator. At run end it is serialised to
//! `run.json` inside the run directory so a failed run can be inspected and
//! resumed-from-stage by tooling.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Pipeline stages in dependency order.
///
/// `Rendering` and `Narrating` are independent of each other; `Assembling`
/// requires both. Slides-only runs skip `Narrating` and `Assembling`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Stage {
    Extracting,
    Planning,
    Compiling,
    Rendering,
    Narrating,
    Assembling,
}

impl Stage {
    /// All stages, in nominal execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Extracting,
        Stage::Planning,
        Stage::Compiling,
        Stage::Rendering,
        Stage::Narrating,
        Stage::Assembling,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extracting => "extracting",
            Stage::Planning => "planning",
            Stage::Compiling => "compiling",
            Stage::Rendering => "rendering",
            Stage::Narrating => "narrating",
            Stage::Assembling => "assembling",
        };
        f.write_str(name)
    }
}

/// Status of a single stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Done,
    Failed { error: String },
    /// Stage was not applicable to this run (e.g. narration in slides-only).
    Skipped,
}

/// Overall run state, derived from per-stage statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Queued,
    Running,
    Done,
    Failed,
}

/// Mutable record of one end-to-end pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identity: the document digest prefix plus a monotonic component,
    /// unique per process.
    pub id: String,
    /// Identity of the input document (content digest).
    pub document: String,
    /// Run state, updated by the orchestrator.
    pub state: RunState,
    /// Per-stage status.
    pub stages: BTreeMap<Stage, StageStatus>,
    /// Per-stage wall-clock duration in milliseconds, recorded on completion.
    pub stage_ms: BTreeMap<Stage, u64>,
    /// Artifact paths produced so far, in creation order.
    pub artifacts: Vec<PathBuf>,
}

impl PipelineRun {
    pub fn new(id: impl Into<String>, document: impl Into<String>, slides_only: bool) -> Self {
        let mut stages = BTreeMap::new();
        for stage in Stage::ALL {
            let status = if slides_only
                && matches!(stage, Stage::Narrating | Stage::Assembling)
            {
                StageStatus::Skipped
            } else {
                StageStatus::Pending
            };
            stages.insert(stage, status);
        }
        Self {
            id: id.into(),
            document: document.into(),
            state: RunState::Queued,
            stages,
            stage_ms: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    /// Mark a stage running. The run itself transitions to `Running` on the
    /// first stage start.
    pub fn stage_started(&mut self, stage: Stage) {
        self.state = RunState::Running;
        self.stages.insert(stage, StageStatus::Running);
    }

    pub fn stage_done(&mut self, stage: Stage, elapsed_ms: u64) {
        self.stages.insert(stage, StageStatus::Done);
        self.stage_ms.insert(stage, elapsed_ms);
    }

    pub fn stage_failed(&mut self, stage: Stage, error: String) {
        self.stages.insert(stage, StageStatus::Failed { error });
        self.state = RunState::Failed;
    }

    /// Record an artifact path for the failure report / resume tooling.
    pub fn record_artifact(&mut self, path: impl Into<PathBuf>) {
        self.artifacts.push(path.into());
    }

    /// Mark the run complete. Only valid when no stage failed.
    pub fn finish(&mut self) {
        if self.state != RunState::Failed {
            self.state = RunState::Done;
        }
    }

    /// Whether any artifacts survived for a retry-from-stage.
    pub fn has_partial_artifacts(&self) -> bool {
        !self.artifacts.is_empty()
    }
}

/// Immutable summary returned to the caller on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub document: String,
    /// Final video path; `None` for slides-only runs.
    pub video: Option<PathBuf>,
    /// Compiled deck markup path.
    pub deck: PathBuf,
    /// Ordered frame image paths.
    pub frames: Vec<PathBuf>,
    /// Ordered audio clip paths; empty for slides-only runs.
    pub clips: Vec<PathBuf>,
    /// Number of slides in the plan.
    pub slide_count: usize,
    /// Number of figures extracted.
    pub figure_count: usize,
    /// Total narration duration in seconds; 0 for slides-only runs.
    pub narration_secs: f64,
    /// Per-stage wall-clock durations.
    pub stage_ms: BTreeMap<Stage, u64>,
    pub total_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_is_queued_with_pending_stages() {
        let run = PipelineRun::new("r1", "abc123", false);
        assert_eq!(run.state, RunState::Queued);
        assert!(run
            .stages
            .values()
            .all(|s| matches!(s, StageStatus::Pending)));
    }

    #[test]
    fn slides_only_marks_narrate_and_assemble_skipped() {
        let run = PipelineRun::new("r1", "abc123", true);
        assert_eq!(run.stages[&Stage::Narrating], StageStatus::Skipped);
        assert_eq!(run.stages[&Stage::Assembling], StageStatus::Skipped);
        assert_eq!(run.stages[&Stage::Rendering], StageStatus::Pending);
    }

    #[test]
    fn failure_from_any_stage_marks_run_failed() {
        let mut run = PipelineRun::new("r1", "abc123", false);
        run.stage_started(Stage::Extracting);
        run.stage_done(Stage::Extracting, 100);
        run.stage_started(Stage::Planning);
        run.stage_failed(Stage::Planning, "model unreachable".into());
        assert_eq!(run.state, RunState::Failed);

        // finish() must not override a failure.
        run.finish();
        assert_eq!(run.state, RunState::Failed);
    }

    #[test]
    fn successful_run_finishes_done() {
        let mut run = PipelineRun::new("r1", "abc123", true);
        for stage in [Stage::Extracting, Stage::Planning, Stage::Compiling, Stage::Rendering] {
            run.stage_started(stage);
            run.stage_done(stage, 10);
        }
        run.finish();
        assert_eq!(run.state, RunState::Done);
    }

    #[test]
    fn run_round_trips_through_json() {
        let mut run = PipelineRun::new("r1", "abc123", false);
        run.stage_started(Stage::Extracting);
        run.stage_failed(Stage::Extracting, "auth".into());
        run.record_artifact("/tmp/run/text.md");

        let json = serde_json::to_string(&run).expect("serialise");
        let back: PipelineRun = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back.state, RunState::Failed);
        assert!(back.has_partial_artifacts());
    }

    #[test]
    fn stage_display_names() {
        assert_eq!(Stage::Extracting.to_string(), "extracting");
        assert_eq!(Stage::Assembling.to_string(), "assembling");
    }
}
