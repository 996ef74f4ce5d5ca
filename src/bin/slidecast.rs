//! CLI binary for slidecast.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` and prints a per-stage status summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use slidecast::{
    convert, PipelineConfig, PipelineProgressCallback, ProgressCallback, RunReport,
    SlideCountTarget, Stage,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────

/// Terminal progress: a spinner that names the active stage, plus per-slide
/// narration lines. Narration events may arrive out of order (concurrent
/// synthesis), so each line carries its own slide number.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgress {
    fn on_run_start(&self, run_id: &str) {
        self.bar.set_prefix("Starting");
        self.bar.set_message(format!("run {run_id}"));
    }

    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_prefix(format!("{stage}"));
        self.bar.set_message("");
    }

    fn on_stage_complete(&self, stage: Stage) {
        self.bar.println(format!("  {} {stage}", green("✓")));
    }

    fn on_stage_failed(&self, stage: Stage, error: String) {
        let first_line = error.lines().next().unwrap_or("failed").to_string();
        self.bar
            .println(format!("  {} {stage}: {first_line}", red("✗")));
    }

    fn on_narration_start(&self, slide: usize, total: usize) {
        self.bar.set_message(format!("slide {slide}/{total}"));
    }

    fn on_narration_complete(&self, slide: usize, total: usize, duration_secs: f64) {
        self.bar.println(format!(
            "    {} narration {slide}/{total} {}",
            green("✓"),
            dim(&format!("{duration_secs:.1}s"))
        ));
    }

    fn on_run_complete(&self, _success: bool) {
        self.bar.finish_and_clear();
    }
}

// ── Args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "slidecast",
    version,
    about = "Turn a document into a narrated video slide deck",
    after_help = "EXAMPLES:\n    \
        slidecast paper.pdf\n    \
        slidecast paper.pdf --slides 7\n    \
        slidecast notes.txt --slides-only --no-figures\n    \
        slidecast https://example.com/paper.pdf -o out/"
)]
struct Cli {
    /// Document path or HTTP(S) URL (PDF or plain text).
    input: String,

    /// Output root; artifacts land in <OUT>/<run id>/.
    #[arg(short, long, default_value = "runs")]
    out: String,

    /// Exact slide count (2-20). Omit to let the model choose.
    #[arg(long)]
    slides: Option<usize>,

    /// Stop after rendering frames: no narration, no video.
    #[arg(long)]
    slides_only: bool,

    /// Skip figure extraction entirely.
    #[arg(long)]
    no_figures: bool,

    /// Concurrent narration synthesis calls.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Retries per transient external failure.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Per-service-call timeout in seconds.
    #[arg(long, default_value_t = 120)]
    api_timeout: u64,

    /// Per-tool (marp/ffmpeg) timeout in seconds.
    #[arg(long, default_value_t = 300)]
    tool_timeout: u64,

    /// Delete partial artifacts when a run fails.
    #[arg(long)]
    cleanup_on_failure: bool,

    /// Suppress progress output.
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging (debug level).
    #[arg(short, long)]
    verbose: bool,
}

fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let target = match cli.slides {
        Some(n) => SlideCountTarget::Exactly(n),
        None => SlideCountTarget::Auto,
    };

    let mut builder = PipelineConfig::builder()
        .target_slides(target)
        .figures_enabled(!cli.no_figures)
        .slides_only(cli.slides_only)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .tool_timeout_secs(cli.tool_timeout)
        .cleanup_on_failure(cli.cleanup_on_failure);

    if let Some(cb) = progress {
        builder = builder.progress(cb);
    }

    builder.build().context("invalid configuration")
}

fn print_summary(report: &RunReport) {
    println!("{}", bold("Run complete"));
    println!("  run:       {}", report.run_id);
    println!("  slides:    {}", report.slide_count);
    println!("  figures:   {}", report.figure_count);
    for (stage, ms) in &report.stage_ms {
        println!("  {:<10} {}", format!("{stage}:"), dim(&format!("{ms}ms")));
    }
    if report.narration_secs > 0.0 {
        println!("  narration: {:.1}s", report.narration_secs);
    }
    println!("  deck:      {}", report.deck.display());
    match &report.video {
        Some(video) => println!("  video:     {}", video.display()),
        None => println!("  frames:    {} images", report.frames.len()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Suppress library logs while the progress spinner is active; the
    // spinner is the feedback channel that matters interactively.
    let show_progress = !cli.quiet && !cli.verbose;
    let filter = if cli.verbose {
        "debug"
    } else if show_progress || cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgress::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress)?;

    match convert(&cli.input, &config, &cli.out).await {
        Ok(report) => {
            if !cli.quiet {
                print_summary(&report);
            } else if let Some(video) = &report.video {
                println!("{}", video.display());
            }
            Ok(())
        }
        Err(e) => {
            let stage = e
                .stage()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "setup".to_string());
            eprintln!("{} in {stage}: {e}", red("error"));
            if e.is_transient() {
                eprintln!("{}", dim("The failure looks transient; re-running may succeed."));
            }
            std::process::exit(1);
        }
    }
}
