//! Video assembly: mux ordered frames and clips into the final video.
//!
//! Each slide becomes a still-image clip whose display duration is its
//! narration clip's probed length; the clips are then concatenated with
//! stream copy. Two-step assembly (per-slide clips, then concat) keeps the
//! expensive x264 encode per slide and makes the concat a cheap remux.
//!
//! ## Pairing is validated first
//!
//! Frames and clips must cover the same index set. A missing index fails
//! fast with a diagnostic naming it — silently dropping slide 3 and
//! shipping a 4-slide video is the failure mode this check exists to
//! prevent.

use crate::artifact::{AudioClip, FrameImage, RunDir};
use crate::config::PipelineConfig;
use crate::error::AssemblyError;
use crate::pipeline::proc::{run_tool, ToolError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Drives ffmpeg over rendered frames and normalised clips.
pub struct VideoAssembler {
    tool_timeout_secs: u64,
    default_slide_secs: f64,
}

impl VideoAssembler {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            tool_timeout_secs: config.tool_timeout_secs,
            default_slide_secs: config.default_slide_secs,
        }
    }

    /// Mux narrated video: frame `i` is shown for the duration of clip `i`.
    pub async fn assemble(
        &self,
        frames: &[FrameImage],
        clips: &[AudioClip],
        run: &RunDir,
    ) -> Result<PathBuf, AssemblyError> {
        validate_pairing(frames, clips)?;

        let scratch = tempfile::tempdir().map_err(|e| AssemblyError::Io {
            path: PathBuf::from("<tempdir>"),
            detail: e.to_string(),
        })?;

        let mut slide_clips = Vec::with_capacity(frames.len());
        for (frame, clip) in frames.iter().zip(clips.iter()) {
            let out = scratch
                .path()
                .join(format!("clip_{:02}.mp4", frame.slide_index));
            self.encode_slide_clip(frame, clip, &out).await?;
            slide_clips.push(out);
        }

        let video = self.concat(&slide_clips, scratch.path(), run).await?;
        info!("assembled {} slides into {}", frames.len(), video.display());
        Ok(video)
    }

    /// Mux a silent video with a fixed per-slide duration. Used by tooling
    /// over partial artifacts; the orchestrated slides-only flow stops
    /// before assembly entirely.
    pub async fn assemble_fixed_duration(
        &self,
        frames: &[FrameImage],
        run: &RunDir,
    ) -> Result<PathBuf, AssemblyError> {
        if frames.is_empty() {
            return Err(AssemblyError::Empty);
        }

        let scratch = tempfile::tempdir().map_err(|e| AssemblyError::Io {
            path: PathBuf::from("<tempdir>"),
            detail: e.to_string(),
        })?;

        let secs = format!("{}", self.default_slide_secs);
        let mut slide_clips = Vec::with_capacity(frames.len());
        for frame in frames {
            let out = scratch
                .path()
                .join(format!("clip_{:02}.mp4", frame.slide_index));
            let frame_str = frame.path.to_string_lossy();
            let out_str = out.to_string_lossy();
            let args = [
                "-y",
                "-loop",
                "1",
                "-t",
                secs.as_str(),
                "-i",
                frame_str.as_ref(),
                "-c:v",
                "libx264",
                "-tune",
                "stillimage",
                "-pix_fmt",
                "yuv420p",
                out_str.as_ref(),
            ];
            self.run_ffmpeg(&args).await?;
            slide_clips.push(out);
        }

        let video = self.concat(&slide_clips, scratch.path(), run).await?;
        info!(
            "assembled {} silent slides ({}s each) into {}",
            frames.len(),
            secs,
            video.display()
        );
        Ok(video)
    }

    /// Encode one slide: looped still image + audio, cut to clip length.
    async fn encode_slide_clip(
        &self,
        frame: &FrameImage,
        clip: &AudioClip,
        out: &Path,
    ) -> Result<(), AssemblyError> {
        let duration = format!("{}", clip.duration_secs);
        let frame_str = frame.path.to_string_lossy();
        let clip_str = clip.path.to_string_lossy();
        let out_str = out.to_string_lossy();
        let args = [
            "-y",
            "-loop",
            "1",
            "-i",
            frame_str.as_ref(),
            "-i",
            clip_str.as_ref(),
            "-c:v",
            "libx264",
            "-tune",
            "stillimage",
            "-c:a",
            "aac",
            "-b:a",
            "192k",
            "-pix_fmt",
            "yuv420p",
            "-shortest",
            "-t",
            duration.as_str(),
            out_str.as_ref(),
        ];
        debug!(
            "slide {}: {:.2}s clip",
            frame.slide_index, clip.duration_secs
        );
        self.run_ffmpeg(&args).await
    }

    /// Concatenate slide clips with stream copy into `video.mp4`.
    async fn concat(
        &self,
        slide_clips: &[PathBuf],
        scratch: &Path,
        run: &RunDir,
    ) -> Result<PathBuf, AssemblyError> {
        let list_path = scratch.join("concat_clips.txt");
        let mut list = String::new();
        for clip in slide_clips {
            // The concat demuxer's quoting rule: single-quoted, embedded
            // quotes closed-escaped-reopened.
            let quoted = clip.to_string_lossy().replace('\'', "'\\''");
            list.push_str(&format!("file '{quoted}'\n"));
        }
        std::fs::write(&list_path, &list).map_err(|e| AssemblyError::Io {
            path: list_path.clone(),
            detail: e.to_string(),
        })?;

        let video = run.video_path();
        let list_str = list_path.to_string_lossy();
        let video_str = video.to_string_lossy();
        let args = [
            "-y",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
            list_str.as_ref(),
            "-c",
            "copy",
            video_str.as_ref(),
        ];
        self.run_ffmpeg(&args).await?;
        Ok(video)
    }

    async fn run_ffmpeg(&self, args: &[&str]) -> Result<(), AssemblyError> {
        let out = run_tool("ffmpeg", args, None, self.tool_timeout_secs)
            .await
            .map_err(|e| match e {
                ToolError::NotFound => AssemblyError::FfmpegNotFound,
                ToolError::Spawn(detail) => AssemblyError::Muxer { detail },
                ToolError::TimedOut { secs } => AssemblyError::Timeout { secs },
            })?;
        if !out.success() {
            return Err(AssemblyError::Muxer {
                detail: out.stderr_excerpt(),
            });
        }
        Ok(())
    }
}

/// Check that frames and clips cover identical, ordered index sets.
///
/// The diagnostic names the first missing index so the operator knows which
/// slide to re-synthesize or re-render.
pub(crate) fn validate_pairing(
    frames: &[FrameImage],
    clips: &[AudioClip],
) -> Result<(), AssemblyError> {
    if frames.is_empty() {
        return Err(AssemblyError::Empty);
    }

    let frame_set: BTreeSet<usize> = frames.iter().map(|f| f.slide_index).collect();
    let clip_set: BTreeSet<usize> = clips.iter().map(|c| c.slide_index).collect();

    for index in frame_set.union(&clip_set) {
        if !clip_set.contains(index) {
            return Err(AssemblyError::MissingClip { index: *index });
        }
        if !frame_set.contains(index) {
            return Err(AssemblyError::MissingFrame { index: *index });
        }
    }
    Ok(())
}
