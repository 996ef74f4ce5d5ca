//! Slide planning: turn extracted text (and known figures) into a
//! structured [`SlidePlan`] via the planner model.
//!
//! ## Prompt compaction
//!
//! Document text arrives with the whitespace artefacts of OCR: unicode
//! spaces, runs of blanks, stacked empty lines. [`compact_whitespace`]
//! collapses these before the prompt is sent — the tokens saved are pure
//! cost with no information content. Both the raw and compacted sizes are
//! logged so a bad compaction is diagnosable.
//!
//! ## Repair round-trip
//!
//! Model output is validated against the slide schema (parseable JSON,
//! contiguous slide numbers, known figure ids, slide count within bounds /
//! matching an exact target). The first validation failure triggers exactly
//! one repair exchange that quotes the failure back to the model. A second
//! failure fails the stage: the pipeline never truncates or pads a plan to
//! make the numbers work.

use crate::artifact::Figure;
use crate::config::{PipelineConfig, SlideCountTarget, MAX_SLIDES, MIN_SLIDES};
use crate::error::PlanningError;
use crate::prompts;
use crate::provider::{PlannerModel, ServiceError};
use crate::retry::RetryPolicy;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One slide of the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slide {
    /// 1-based, contiguous within the plan.
    pub index: usize,
    pub title: String,
    /// On-screen bullet lines.
    pub bullets: Vec<String>,
    /// Spoken script for this slide.
    pub narration: String,
    /// Reference into the extraction's figures, validated at plan time.
    pub figure_id: Option<String>,
}

/// The ordered slide plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidePlan {
    pub slides: Vec<Slide>,
    pub target: SlideCountTarget,
}

impl SlidePlan {
    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    /// Human-readable narration script, one section per slide.
    pub fn narration_script(&self) -> String {
        let mut out = String::new();
        for slide in &self.slides {
            out.push_str(&format!("--- Slide {}: {} ---\n", slide.index, slide.title));
            out.push_str(&slide.narration);
            out.push_str("\n\n");
        }
        out
    }
}

/// Drives the planner model with compaction, validation, and repair.
pub struct SlidePlanner {
    model: Arc<dyn PlannerModel>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl SlidePlanner {
    pub fn new(model: Arc<dyn PlannerModel>, config: &PipelineConfig) -> Self {
        Self {
            model,
            retry: config.retry_policy(),
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Produce a validated plan for `text`, or fail with [`PlanningError`].
    pub async fn plan(
        &self,
        text: &str,
        figures: &[Figure],
        target: SlideCountTarget,
    ) -> Result<SlidePlan, PlanningError> {
        if text.trim().is_empty() {
            return Err(PlanningError::EmptyText);
        }

        let compacted = compact_whitespace(text);
        info!(
            "planner prompt: {} chars raw, {} compacted",
            text.len(),
            compacted.len()
        );
        debug!(raw = %text, "planner input before compaction");
        debug!(compacted = %compacted, "planner input after compaction");

        let instruction = match target.exact() {
            Some(n) => prompts::exact_count_instruction(n),
            None => prompts::auto_count_instruction(MIN_SLIDES, MAX_SLIDES),
        };
        let system = compact_whitespace(prompts::PLANNER_SYSTEM_PROMPT);
        let user = prompts::planner_user_prompt(&compacted, figures, &instruction);

        let first = self.complete(&system, &user).await?;
        let problem = match validate(&first, figures, target) {
            Ok(plan) => return Ok(plan),
            Err(problem) => problem,
        };

        // Exactly one repair round-trip, quoting the failure.
        warn!("plan invalid ({problem}); sending repair round-trip");
        let repair_user = prompts::repair_prompt(&problem.to_string(), &first);
        let second = self.complete(&system, &repair_user).await?;
        match validate(&second, figures, target) {
            Ok(plan) => Ok(plan),
            Err(problem) => Err(problem.into_error()),
        }
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, PlanningError> {
        self.retry
            .run("planner", |_| async move {
                match tokio::time::timeout(self.call_timeout, self.model.complete(system, user))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ServiceError::Timeout {
                        elapsed_ms: self.call_timeout.as_millis() as u64,
                    }),
                }
            })
            .await
            .map_err(PlanningError::Service)
    }
}

// ── Validation ───────────────────────────────────────────────────────────

/// Why a model response failed validation. Carried into the repair prompt
/// verbatim, and mapped onto [`PlanningError`] when repair is exhausted.
#[derive(Debug)]
enum Problem {
    Parse(String),
    Count { requested: usize, produced: usize },
    Bounds { produced: usize },
    DanglingFigure { slide: usize, figure_id: String },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::Parse(detail) => write!(f, "response does not parse: {detail}"),
            Problem::Count {
                requested,
                produced,
            } => write!(f, "expected exactly {requested} slides, got {produced}"),
            Problem::Bounds { produced } => write!(
                f,
                "{produced} slides is outside the {MIN_SLIDES}\u{2013}{MAX_SLIDES} bound"
            ),
            Problem::DanglingFigure { slide, figure_id } => write!(
                f,
                "slide {slide} references figure '{figure_id}' which is not in the available list"
            ),
        }
    }
}

impl Problem {
    fn into_error(self) -> PlanningError {
        match self {
            Problem::Parse(detail) => PlanningError::Unparseable {
                detail,
                attempts: 2,
            },
            Problem::Count {
                requested,
                produced,
            } => PlanningError::SlideCountMismatch {
                requested,
                produced,
            },
            Problem::Bounds { produced } => PlanningError::CountOutOfBounds {
                produced,
                min: MIN_SLIDES,
                max: MAX_SLIDES,
            },
            Problem::DanglingFigure { slide, figure_id } => PlanningError::Unparseable {
                detail: format!("slide {slide} references unknown figure '{figure_id}'"),
                attempts: 2,
            },
        }
    }
}

/// Slide content as models actually emit it: a list of bullets or one block
/// of text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Bullets(Vec<String>),
    Text(String),
}

impl Default for RawContent {
    fn default() -> Self {
        RawContent::Bullets(Vec::new())
    }
}

impl RawContent {
    fn into_bullets(self) -> Vec<String> {
        match self {
            RawContent::Bullets(b) => b
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            RawContent::Text(t) => t
                .lines()
                .map(|l| l.trim().trim_start_matches("- ").to_string())
                .filter(|l| !l.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSlide {
    #[serde(default, alias = "slide number")]
    slide_number: Option<usize>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: RawContent,
    #[serde(default, alias = "audio")]
    narration: Option<String>,
    #[serde(default)]
    figure_id: Option<String>,
}

/// Models wrap the list in `{"slides": [...]}` or emit a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPlan {
    Wrapped { slides: Vec<RawSlide> },
    Bare(Vec<RawSlide>),
}

impl RawPlan {
    fn into_slides(self) -> Vec<RawSlide> {
        match self {
            RawPlan::Wrapped { slides } => slides,
            RawPlan::Bare(slides) => slides,
        }
    }
}

/// Parse and validate one model response into a [`SlidePlan`].
fn validate(
    raw: &str,
    figures: &[Figure],
    target: SlideCountTarget,
) -> Result<SlidePlan, Problem> {
    let cleaned = fix_json_newlines(&strip_json_fences(raw));
    let parsed: RawPlan =
        serde_json::from_str(&cleaned).map_err(|e| Problem::Parse(e.to_string()))?;
    let mut raw_slides = parsed.into_slides();
    if raw_slides.is_empty() {
        return Err(Problem::Parse("plan contains no slides".into()));
    }

    // Order by the model's numbering, then re-index contiguously: the
    // numbering communicates *order*, the plan owns the indices.
    raw_slides.sort_by_key(|s| s.slide_number.unwrap_or(usize::MAX));

    let mut slides = Vec::with_capacity(raw_slides.len());
    for (pos, raw_slide) in raw_slides.into_iter().enumerate() {
        let index = pos + 1;
        let figure_id = raw_slide
            .figure_id
            .filter(|id| !id.trim().is_empty());
        if let Some(ref id) = figure_id {
            if !figures.iter().any(|f| &f.id == id) {
                return Err(Problem::DanglingFigure {
                    slide: index,
                    figure_id: id.clone(),
                });
            }
        }
        slides.push(Slide {
            index,
            title: raw_slide
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| format!("Slide {index}")),
            bullets: raw_slide.content.into_bullets(),
            narration: raw_slide.narration.unwrap_or_default().trim().to_string(),
            figure_id,
        });
    }

    let produced = slides.len();
    match target.exact() {
        Some(requested) if produced != requested => {
            return Err(Problem::Count {
                requested,
                produced,
            })
        }
        _ => {}
    }
    if !(MIN_SLIDES..=MAX_SLIDES).contains(&produced) {
        return Err(Problem::Bounds { produced });
    }

    Ok(SlidePlan { slides, target })
}

// ── Text utilities ───────────────────────────────────────────────────────

static RE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse internal whitespace to save prompt tokens while keeping the
/// text readable: unicode spaces become ASCII, runs collapse to one space,
/// blank lines collapse to one.
pub fn compact_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut prev_blank = false;
    for raw in text.lines() {
        let ascii: String = raw
            .chars()
            .map(|c| match c {
                '\u{00A0}' | '\u{2002}' | '\u{2003}' | '\u{2009}' => ' ',
                other => other,
            })
            .collect();
        let stripped = RE_RUNS.replace_all(ascii.trim(), " ").into_owned();
        if stripped.is_empty() {
            if !prev_blank {
                lines.push(String::new());
            }
            prev_blank = true;
        } else {
            lines.push(stripped);
            prev_blank = false;
        }
    }
    lines.join("\n").trim().to_string()
}

static RE_STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)"((?:\\.|[^"\\])*)""#).unwrap());

/// Escape literal newlines inside JSON string values. Models reliably emit
/// real newlines in narration text despite being told to escape them.
pub fn fix_json_newlines(json: &str) -> String {
    RE_STRING_LITERAL
        .replace_all(json, |caps: &regex::Captures<'_>| {
            caps[0].replace('\n', "\\n")
        })
        .into_owned()
}

static RE_JSON_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\n(.*)\n```\s*$").unwrap());

/// Strip an outer ```json fence when the model disobeys the prompt.
pub fn strip_json_fences(raw: &str) -> String {
    match RE_JSON_FENCES.captures(raw.trim()) {
        Some(caps) => caps[1].to_string(),
        None => raw.trim().to_string(),
    }
}
