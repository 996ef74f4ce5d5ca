//! Integration tests for the slidecast pipeline.
//!
//! Every external service is replaced by an in-process fake injected through
//! `PipelineConfig`, so these tests exercise real orchestration, caching,
//! planning, and compilation without touching the network.
//!
//! Tests that shell out to marp-cli or ffmpeg are skipped when the tool is
//! not on PATH, in the same spirit as env-gated e2e suites: run them on a
//! fully provisioned machine to cover the last mile.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use slidecast::pipeline::proc::run_tool;
use slidecast::{
    compile, ExtractionCache, Orchestrator, OcrService, PipelineConfig, PipelineError,
    PlannerModel, PlanningError, ServiceError, SlideCountTarget, SlidePlanner, SourceDocument,
    SpeechService, Stage,
};
use slidecast::provider::{OcrImage, OcrPage, OcrResponse};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Fakes ────────────────────────────────────────────────────────────────

fn tiny_png_base64() -> String {
    let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
        4,
        4,
        image::Rgba([0, 128, 255, 255]),
    ));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    STANDARD.encode(buf)
}

/// OCR fake: a 10-page document with 3 embedded figures.
struct FakeOcr {
    calls: AtomicUsize,
}

impl FakeOcr {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl OcrService for FakeOcr {
    async fn read_document(
        &self,
        _bytes: &[u8],
        include_images: bool,
    ) -> Result<OcrResponse, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pages = (1..=10)
            .map(|n| {
                let images = if include_images && (n == 2 || n == 5 || n == 8) {
                    vec![OcrImage {
                        id: format!("img-{n}"),
                        bbox: [10.0, 10.0, 300.0, 200.0],
                        image_base64: tiny_png_base64(),
                    }]
                } else {
                    vec![]
                };
                OcrPage {
                    page: n,
                    markdown: format!(
                        "## Section {n}\n\nPage {n} prose about the system. Figure {n}: \
                         measurements at step {n}."
                    ),
                    images,
                }
            })
            .collect();
        Ok(OcrResponse { pages })
    }
}

/// Planner fake: emits a syntactically valid plan of the requested size,
/// referencing the first known figure on slide 2.
struct FakePlanner {
    count: usize,
    figure_id: Option<String>,
    calls: AtomicUsize,
}

impl FakePlanner {
    fn new(count: usize, figure_id: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            count,
            figure_id: figure_id.map(String::from),
            calls: AtomicUsize::new(0),
        })
    }

    fn plan_json(&self) -> String {
        let slides: Vec<String> = (1..=self.count)
            .map(|n| {
                let figure = match (&self.figure_id, n) {
                    (Some(id), 2) => format!(r#""figure_id": "{id}","#),
                    _ => String::new(),
                };
                format!(
                    r#"{{"slide_number": {n}, "title": "Part {n}", {figure}
                        "content": ["key point {n}"], "narration": "Spoken notes for part {n}."}}"#
                )
            })
            .collect();
        format!(r#"{{"slides": [{}]}}"#, slides.join(","))
    }
}

#[async_trait]
impl PlannerModel for FakePlanner {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.plan_json())
    }
}

/// Planner fake that always fails with a permanent error.
struct AuthFailPlanner;

#[async_trait]
impl PlannerModel for AuthFailPlanner {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ServiceError> {
        Err(ServiceError::Auth {
            detail: "invalid key".into(),
        })
    }
}

/// Speech fake: returns a short silent WAV for any script.
struct FakeSpeech;

#[async_trait]
impl SpeechService for FakeSpeech {
    async fn speak(&self, _text: &str) -> Result<Vec<u8>, ServiceError> {
        let samples = 4000u32; // 0.5s at 8 kHz
        let data_len = samples * 2;
        let mut wav = Vec::with_capacity(44 + data_len as usize);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&8000u32.to_le_bytes());
        wav.extend_from_slice(&16000u32.to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        wav.resize(44 + data_len as usize, 0);
        Ok(wav)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn document() -> SourceDocument {
    SourceDocument::from_bytes(b"%PDF-1.7 ten page paper".to_vec(), "paper.pdf")
}

async fn marp_available() -> bool {
    matches!(
        run_tool("npx", &["marp", "--version"], None, 60).await,
        Ok(out) if out.success()
    )
}

async fn ffmpeg_available() -> bool {
    run_tool("ffmpeg", &["-version"], None, 10).await.is_ok()
        && run_tool("ffprobe", &["-version"], None, 10).await.is_ok()
}

// ── Extraction + cache properties ────────────────────────────────────────

#[tokio::test]
async fn text_and_figure_consumers_share_one_extraction() {
    let tmp = tempfile::tempdir().unwrap();
    let ocr = FakeOcr::new();
    let config = PipelineConfig::builder().build().unwrap();
    let extractor = Arc::new(slidecast::DocumentExtractor::new(
        Arc::clone(&ocr) as Arc<dyn OcrService>,
        tmp.path().join("figures"),
        &config,
    ));
    let cache = Arc::new(ExtractionCache::new(extractor as Arc<dyn slidecast::Extract>));

    let doc = document();
    // A text consumer and a figures consumer ask at different times, plus
    // two concurrent callers in between.
    let text = cache.get_or_extract(&doc).await.unwrap().text.clone();
    let (a, b) = tokio::join!(cache.get_or_extract(&doc), cache.get_or_extract(&doc));
    let figures = cache.get_or_extract(&doc).await.unwrap().figures.clone();

    assert!(!text.is_empty());
    assert_eq!(figures.len(), 3);
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(
        ocr.calls.load(Ordering::SeqCst),
        1,
        "exactly one OCR call regardless of interleaving"
    );
}

#[tokio::test]
async fn extraction_writes_figures_with_recovered_captions() {
    let tmp = tempfile::tempdir().unwrap();
    let config = PipelineConfig::builder().build().unwrap();
    let extractor = slidecast::DocumentExtractor::new(
        FakeOcr::new() as Arc<dyn OcrService>,
        tmp.path().join("figures"),
        &config,
    );

    use slidecast::Extract as _;
    let result = extractor.extract(&document()).await.unwrap();
    assert_eq!(result.page_count, 10);
    assert_eq!(result.figures.len(), 3);
    for figure in &result.figures {
        assert!(figure.image_path.exists());
        assert!(figure.title.starts_with("Figure "));
    }
    // Figures are numbered in document order.
    let pages: Vec<usize> = result.figures.iter().map(|f| f.page).collect();
    assert_eq!(pages, vec![2, 5, 8]);
}

// ── Planning properties ──────────────────────────────────────────────────

#[tokio::test]
async fn exact_target_produces_exactly_that_many_slides() {
    let config = PipelineConfig::builder().build().unwrap();
    let planner = SlidePlanner::new(FakePlanner::new(7, None) as Arc<dyn PlannerModel>, &config);

    let plan = planner
        .plan("A long document body.", &[], SlideCountTarget::Exactly(7))
        .await
        .unwrap();
    assert_eq!(plan.len(), 7);
    let indices: Vec<usize> = plan.slides.iter().map(|s| s.index).collect();
    assert_eq!(indices, (1..=7).collect::<Vec<_>>());
}

#[tokio::test]
async fn permanent_planner_failure_propagates_without_retry() {
    let config = PipelineConfig::builder().max_retries(3).build().unwrap();
    let planner = SlidePlanner::new(Arc::new(AuthFailPlanner) as Arc<dyn PlannerModel>, &config);

    let err = planner
        .plan("Text.", &[], SlideCountTarget::Auto)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PlanningError::Service(ServiceError::Auth { .. })
    ));
}

// ── Scenario: figures flow through plan and deck ─────────────────────────

#[tokio::test]
async fn figures_scenario_end_to_end_through_compile() {
    let tmp = tempfile::tempdir().unwrap();
    let config = PipelineConfig::builder().build().unwrap();
    let extractor = slidecast::DocumentExtractor::new(
        FakeOcr::new() as Arc<dyn OcrService>,
        tmp.path().join("figures"),
        &config,
    );

    use slidecast::Extract as _;
    let extraction = extractor.extract(&document()).await.unwrap();
    assert_eq!(extraction.figures.len(), 3);

    let planner = SlidePlanner::new(
        FakePlanner::new(5, Some("img-2")) as Arc<dyn PlannerModel>,
        &config,
    );
    let plan = planner
        .plan(
            &extraction.text,
            &extraction.figures,
            SlideCountTarget::Exactly(5),
        )
        .await
        .unwrap();
    assert_eq!(plan.len(), 5);
    assert!(
        plan.slides.iter().any(|s| s.figure_id.is_some()),
        "at least one slide references a valid figure"
    );

    let deck = compile(&plan, &extraction.figures).unwrap();
    assert_eq!(deck.block_count(), 5);
    let markup = deck.to_markup();
    assert!(markup.contains("figure-1.png"), "figure image embedded");
}

// ── Orchestrated runs ────────────────────────────────────────────────────

fn orchestrated_config(
    planner: Arc<dyn PlannerModel>,
    slides_only: bool,
) -> PipelineConfig {
    PipelineConfig::builder()
        .ocr(FakeOcr::new() as Arc<dyn OcrService>)
        .planner(planner)
        .speech(Arc::new(FakeSpeech) as Arc<dyn SpeechService>)
        .target_slides(SlideCountTarget::Exactly(3))
        .slides_only(slides_only)
        .max_retries(1)
        .build()
        .unwrap()
}

#[tokio::test]
async fn planning_failure_keeps_extraction_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let config = orchestrated_config(Arc::new(AuthFailPlanner), false);
    let orchestrator = Orchestrator::from_config(config, tmp.path()).unwrap();

    let err = orchestrator.run(&document()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Planning(_)));
    assert_eq!(err.stage(), Some(Stage::Planning));

    // The run directory survives with the extraction sidecars and the run
    // record for resume-from-stage.
    let run_dirs: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir() && e.file_name() != "figures")
        .collect();
    assert_eq!(run_dirs.len(), 1);
    let run_root = run_dirs[0].path();
    assert!(run_root.join("text.md").exists());
    assert!(run_root.join("figures.json").exists());
    assert!(run_root.join("run.json").exists());

    let record: slidecast::PipelineRun =
        serde_json::from_str(&std::fs::read_to_string(run_root.join("run.json")).unwrap())
            .unwrap();
    assert_eq!(record.state, slidecast::RunState::Failed);
    assert!(record.has_partial_artifacts());
}

#[tokio::test]
async fn cancelled_run_fails_before_extracting() {
    let tmp = tempfile::tempdir().unwrap();
    let config = orchestrated_config(FakePlanner::new(3, None) as Arc<dyn PlannerModel>, true);
    let orchestrator = Orchestrator::from_config(config, tmp.path()).unwrap();
    orchestrator.cancel_handle().cancel();

    let err = orchestrator.run(&document()).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Cancelled {
            stage: Stage::Extracting
        }
    ));
}

#[tokio::test]
async fn slides_only_run_stops_after_rendering() {
    if !marp_available().await {
        println!("SKIP — marp-cli not available (npm i -g @marp-team/marp-cli)");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let config = orchestrated_config(FakePlanner::new(3, None) as Arc<dyn PlannerModel>, true);
    let orchestrator = Orchestrator::from_config(config, tmp.path()).unwrap();

    let report = orchestrator.run(&document()).await.unwrap();
    assert!(report.video.is_none(), "no video in slides-only mode");
    assert!(report.clips.is_empty(), "no audio in slides-only mode");
    assert_eq!(report.frames.len(), report.slide_count);
    for frame in &report.frames {
        assert!(frame.exists());
    }
    assert!((report.narration_secs - 0.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn narrated_run_produces_video_with_matching_counts() {
    if !marp_available().await || !ffmpeg_available().await {
        println!("SKIP — marp-cli and/or ffmpeg not available");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let config = orchestrated_config(FakePlanner::new(3, None) as Arc<dyn PlannerModel>, false);
    let orchestrator = Orchestrator::from_config(config, tmp.path()).unwrap();

    let report = orchestrator.run(&document()).await.unwrap();
    let video = report.video.as_ref().expect("narrated run yields a video");
    assert!(video.exists());
    assert_eq!(report.frames.len(), report.slide_count);
    assert_eq!(report.clips.len(), report.slide_count);
    assert!(
        report.narration_secs > 0.0,
        "summed clip durations drive the video timeline"
    );
}

// ── Progress events ──────────────────────────────────────────────────────

#[tokio::test]
async fn progress_callback_sees_stage_failure() {
    struct Recorder {
        failed: Mutex<Vec<(Stage, String)>>,
    }
    impl slidecast::PipelineProgressCallback for Recorder {
        fn on_stage_failed(&self, stage: Stage, error: String) {
            self.failed.lock().unwrap().push((stage, error));
        }
    }

    let tmp = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder {
        failed: Mutex::new(vec![]),
    });
    let config = PipelineConfig::builder()
        .ocr(FakeOcr::new() as Arc<dyn OcrService>)
        .planner(Arc::new(AuthFailPlanner) as Arc<dyn PlannerModel>)
        .progress(Arc::clone(&recorder) as slidecast::ProgressCallback)
        .build()
        .unwrap();
    let orchestrator = Orchestrator::from_config(config, tmp.path()).unwrap();

    let _ = orchestrator.run(&document()).await;
    let failed = recorder.failed.lock().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, Stage::Planning);
    assert!(failed[0].1.contains("authentication"));
}
