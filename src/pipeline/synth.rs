//! Narration synthesis: one TTS exchange per slide plus mandatory audio
//! normalisation.
//!
//! ## Why normalise every clip?
//!
//! The speech service gives no cross-call format guarantee — sample rate,
//! channel count, and container may differ between responses. The muxer
//! concatenates clips with stream copy, which silently corrupts output when
//! formats differ. Every clip is therefore re-encoded to 16-bit PCM,
//! 44.1 kHz stereo WAV before it becomes an [`AudioClip`]; this step is not
//! optional.
//!
//! ## Concurrency
//!
//! Slides synthesize concurrently up to the configured limit. Completion
//! order is irrelevant: results are reassembled by slide index before the
//! assembler sees them.

use crate::artifact::{AudioClip, RunDir};
use crate::config::PipelineConfig;
use crate::error::SynthesisError;
use crate::pipeline::plan::{Slide, SlidePlan};
use crate::pipeline::proc::{run_tool, ToolError};
use crate::progress::ProgressCallback;
use crate::provider::{ServiceError, SpeechService};
use crate::retry::RetryPolicy;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Drives the speech service and normalises its output.
pub struct NarrationSynthesizer {
    service: Arc<dyn SpeechService>,
    retry: RetryPolicy,
    call_timeout: Duration,
    tool_timeout_secs: u64,
    max_chars: usize,
    concurrency: usize,
}

impl NarrationSynthesizer {
    pub fn new(service: Arc<dyn SpeechService>, config: &PipelineConfig) -> Self {
        Self {
            service,
            retry: config.retry_policy(),
            call_timeout: Duration::from_secs(config.api_timeout_secs),
            tool_timeout_secs: config.tool_timeout_secs,
            max_chars: config.max_narration_chars,
            concurrency: config.concurrency,
        }
    }

    /// Synthesize narration for every slide in the plan.
    ///
    /// Returns clips sorted by slide index, exactly one per slide, or the
    /// failure for the lowest-indexed failing slide.
    pub async fn synthesize_all(
        &self,
        plan: &SlidePlan,
        run: &RunDir,
        progress: Option<&ProgressCallback>,
    ) -> Result<Vec<AudioClip>, SynthesisError> {
        let total = plan.len();
        let results: Vec<Result<AudioClip, (usize, SynthesisError)>> =
            stream::iter(plan.slides.iter().map(|slide| {
                let run = run.clone();
                async move {
                    if let Some(cb) = progress {
                        cb.on_narration_start(slide.index, total);
                    }
                    let result = self
                        .synthesize(slide, &run)
                        .await
                        .map_err(|e| (slide.index, e));
                    if let (Some(cb), Ok(clip)) = (progress, &result) {
                        cb.on_narration_complete(slide.index, total, clip.duration_secs);
                    }
                    result
                }
            }))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut clips = Vec::with_capacity(total);
        let mut first_failure: Option<(usize, SynthesisError)> = None;
        for result in results {
            match result {
                Ok(clip) => clips.push(clip),
                Err((index, e)) => {
                    if first_failure.as_ref().map_or(true, |(i, _)| index < *i) {
                        first_failure = Some((index, e));
                    }
                }
            }
        }
        if let Some((_, e)) = first_failure {
            return Err(e);
        }

        // Completion order is arbitrary under concurrency; the contract to
        // the assembler is index order.
        clips.sort_by_key(|c| c.slide_index);
        info!(
            "synthesized {} clips, {:.1}s narration total",
            clips.len(),
            clips.iter().map(|c| c.duration_secs).sum::<f64>()
        );
        Ok(clips)
    }

    /// Synthesize and normalise one slide's narration.
    pub async fn synthesize(
        &self,
        slide: &Slide,
        run: &RunDir,
    ) -> Result<AudioClip, SynthesisError> {
        let script = slide.narration.trim();
        if script.is_empty() {
            return Err(SynthesisError::EmptyScript { slide: slide.index });
        }
        if script.len() > self.max_chars {
            return Err(SynthesisError::ScriptTooLong {
                slide: slide.index,
                len: script.len(),
                max: self.max_chars,
            });
        }

        let bytes = self
            .retry
            .run("tts", |_| async move {
                match tokio::time::timeout(self.call_timeout, self.service.speak(script)).await {
                    Ok(result) => result,
                    Err(_) => Err(ServiceError::Timeout {
                        elapsed_ms: self.call_timeout.as_millis() as u64,
                    }),
                }
            })
            .await
            .map_err(|source| SynthesisError::Service {
                slide: slide.index,
                source,
            })?;

        let raw_path = run
            .audio_dir()
            .join(format!("raw-slide{:02}", slide.index));
        tokio::fs::write(&raw_path, &bytes)
            .await
            .map_err(|e| SynthesisError::Io {
                path: raw_path.clone(),
                detail: e.to_string(),
            })?;

        let clip_path = run.clip_path(slide.index);
        normalize(&raw_path, &clip_path, slide.index, self.tool_timeout_secs).await?;
        let _ = tokio::fs::remove_file(&raw_path).await;

        let duration = probe_duration(&clip_path, slide.index, self.tool_timeout_secs).await?;
        if duration <= 0.0 {
            return Err(SynthesisError::BadDuration {
                slide: slide.index,
                duration,
            });
        }

        debug!("slide {} narration: {:.2}s", slide.index, duration);
        Ok(AudioClip {
            slide_index: slide.index,
            path: clip_path,
            duration_secs: duration,
        })
    }
}

/// Re-encode a service clip to the run-wide canonical format.
async fn normalize(
    input: &Path,
    output: &Path,
    slide: usize,
    timeout_secs: u64,
) -> Result<(), SynthesisError> {
    let input_str = input.to_string_lossy();
    let output_str = output.to_string_lossy();
    let args = [
        "-y",
        "-i",
        input_str.as_ref(),
        "-acodec",
        "pcm_s16le",
        "-ar",
        "44100",
        "-ac",
        "2",
        output_str.as_ref(),
    ];

    let out = run_tool("ffmpeg", &args, None, timeout_secs)
        .await
        .map_err(|e| match e {
            ToolError::NotFound => SynthesisError::FfmpegNotFound,
            ToolError::Spawn(detail) => SynthesisError::Normalize { slide, detail },
            ToolError::TimedOut { secs } => SynthesisError::Normalize {
                slide,
                detail: format!("timed out after {secs}s"),
            },
        })?;

    if !out.success() {
        return Err(SynthesisError::Normalize {
            slide,
            detail: out.stderr_excerpt(),
        });
    }
    Ok(())
}

/// Probe a clip's duration in seconds via ffprobe.
async fn probe_duration(
    path: &Path,
    slide: usize,
    timeout_secs: u64,
) -> Result<f64, SynthesisError> {
    let path_str = path.to_string_lossy();
    let args = [
        "-i",
        path_str.as_ref(),
        "-show_entries",
        "format=duration",
        "-v",
        "quiet",
        "-of",
        "csv=p=0",
    ];

    let out = run_tool("ffprobe", &args, None, timeout_secs)
        .await
        .map_err(|e| match e {
            ToolError::NotFound => SynthesisError::FfmpegNotFound,
            ToolError::Spawn(detail) => SynthesisError::Normalize { slide, detail },
            ToolError::TimedOut { secs } => SynthesisError::Normalize {
                slide,
                detail: format!("ffprobe timed out after {secs}s"),
            },
        })?;

    if !out.success() {
        return Err(SynthesisError::Normalize {
            slide,
            detail: out.stderr_excerpt(),
        });
    }

    out.stdout
        .trim()
        .parse::<f64>()
        .map_err(|_| SynthesisError::BadDuration {
            slide,
            duration: 0.0,
        })
}
