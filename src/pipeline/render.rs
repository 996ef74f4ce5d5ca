//! Frame rendering: rasterise the compiled deck into one PNG per slide via
//! marp-cli.
//!
//! The renderer is the pipeline's first external *tool* (as opposed to
//! service) boundary. Its two characteristic failures get distinct
//! treatment:
//!
//! * **Environment** — marp-cli or its headless Chromium is missing. This is
//!   the most common misconfiguration on fresh machines and surfaces as
//!   [`RenderError::RendererNotFound`] with install instructions, never as a
//!   generic tool failure.
//! * **Contract** — the tool ran but produced a frame count different from
//!   the deck's block count. Caught here so a mismatched deck never reaches
//!   the assembler.
//!
//! Frame files are named by marp (`deck.001.png`, …). The sequence number is
//! parsed exactly once, at collection, to sort; from then on every frame
//! carries its slide index as a field.

use crate::artifact::{FrameImage, RunDir};
use crate::config::PipelineConfig;
use crate::error::RenderError;
use crate::pipeline::compile::DeckDocument;
use crate::pipeline::proc::{run_tool, ToolError};
use std::path::Path;
use tracing::{debug, info};

/// Drives marp-cli over a compiled deck.
pub struct FrameRenderer {
    tool_timeout_secs: u64,
}

impl FrameRenderer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            tool_timeout_secs: config.tool_timeout_secs,
        }
    }

    /// Write the deck markup and rasterise it into ordered frames.
    pub async fn render(
        &self,
        deck: &DeckDocument,
        run: &RunDir,
    ) -> Result<Vec<FrameImage>, RenderError> {
        let deck_path = run.deck_path();
        tokio::fs::write(&deck_path, deck.to_markup())
            .await
            .map_err(|e| RenderError::Io {
                path: deck_path.clone(),
                detail: e.to_string(),
            })?;
        debug!("wrote deck markup to {}", deck_path.display());

        self.check_renderer().await?;

        let deck_str = deck_path.to_string_lossy();
        let template = run.frames_template();
        let template_str = template.to_string_lossy();
        let args = [
            "marp",
            deck_str.as_ref(),
            "--images",
            "png",
            "--image-scale",
            "2",
            "--allow-local-files",
            // marp derives deck.001.png, deck.002.png, … from this basename.
            "--output",
            template_str.as_ref(),
        ];

        let out = run_tool("npx", &args, Some(run.root()), self.tool_timeout_secs)
            .await
            .map_err(|e| match e {
                ToolError::NotFound => RenderError::RendererNotFound {
                    detail: "npx not found on PATH".into(),
                },
                ToolError::Spawn(detail) => RenderError::Tool { detail },
                ToolError::TimedOut { secs } => RenderError::Timeout { secs },
            })?;

        if !out.success() {
            let stderr = out.stderr_excerpt();
            // A missing headless browser fails the render with a puppeteer
            // launch error; that's an environment problem, not a deck
            // problem.
            let lower = stderr.to_lowercase();
            if lower.contains("chromium") || lower.contains("puppeteer") || lower.contains("browser")
            {
                return Err(RenderError::RendererNotFound { detail: stderr });
            }
            return Err(RenderError::Tool { detail: stderr });
        }

        let frames = collect_frames(&run.frames_dir(), deck.block_count())?;
        info!("rendered {} frames", frames.len());
        Ok(frames)
    }

    /// Probe for marp-cli before the real render so a missing install fails
    /// with instructions instead of an opaque npx error dump.
    async fn check_renderer(&self) -> Result<(), RenderError> {
        let out = run_tool("npx", &["marp", "--version"], None, self.tool_timeout_secs)
            .await
            .map_err(|e| match e {
                ToolError::NotFound => RenderError::RendererNotFound {
                    detail: "npx not found on PATH".into(),
                },
                ToolError::Spawn(detail) => RenderError::Tool { detail },
                ToolError::TimedOut { secs } => RenderError::Timeout { secs },
            })?;
        if !out.success() {
            return Err(RenderError::RendererNotFound {
                detail: out.stderr_excerpt(),
            });
        }
        Ok(())
    }
}

/// Collect marp's output files into index-carrying frame handles.
///
/// Accepts `deck.NNN.png` (multi-slide) and plain `deck.png` (single
/// slide). The filename sequence number is used only to sort; the returned
/// handles carry contiguous 1-based indices.
pub(crate) fn collect_frames(
    dir: &Path,
    expected: usize,
) -> Result<Vec<FrameImage>, RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| RenderError::Io {
        path: dir.to_path_buf(),
        detail: e.to_string(),
    })?;

    let mut numbered: Vec<(usize, std::path::PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RenderError::Io {
            path: dir.to_path_buf(),
            detail: e.to_string(),
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(seq) = frame_sequence(&name) {
            numbered.push((seq, entry.path()));
        }
    }

    if numbered.is_empty() {
        return Err(RenderError::NoFrames {
            dir: dir.to_path_buf(),
        });
    }

    numbered.sort_by_key(|(seq, _)| *seq);
    let frames: Vec<FrameImage> = numbered
        .into_iter()
        .enumerate()
        .map(|(pos, (_, path))| FrameImage {
            slide_index: pos + 1,
            path,
        })
        .collect();

    if frames.len() != expected {
        return Err(RenderError::FrameCountMismatch {
            expected,
            found: frames.len(),
        });
    }
    Ok(frames)
}

/// Parse a marp output filename into its sequence number.
fn frame_sequence(name: &str) -> Option<usize> {
    let rest = name.strip_prefix("deck.")?;
    if rest == "png" {
        // Single-slide decks come out as plain `deck.png`.
        return Some(1);
    }
    let seq = rest.strip_suffix(".png")?;
    seq.parse::<usize>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"png").unwrap();
    }

    #[test]
    fn frames_sorted_and_reindexed() {
        let tmp = tempfile::tempdir().unwrap();
        // Created out of order on purpose.
        touch(tmp.path(), "deck.003.png");
        touch(tmp.path(), "deck.001.png");
        touch(tmp.path(), "deck.002.png");

        let frames = collect_frames(tmp.path(), 3).unwrap();
        let indices: Vec<usize> = frames.iter().map(|f| f.slide_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(frames[0].path.to_string_lossy().ends_with("deck.001.png"));
        assert!(frames[2].path.to_string_lossy().ends_with("deck.003.png"));
    }

    #[test]
    fn single_slide_deck_png_is_frame_one() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "deck.png");
        let frames = collect_frames(tmp.path(), 1).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].slide_index, 1);
    }

    #[test]
    fn unrelated_files_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "deck.001.png");
        touch(tmp.path(), "deck.md");
        touch(tmp.path(), "notes.png");
        touch(tmp.path(), "deck.abc.png");

        let frames = collect_frames(tmp.path(), 1).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn count_mismatch_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "deck.001.png");
        touch(tmp.path(), "deck.002.png");

        let err = collect_frames(tmp.path(), 3).unwrap_err();
        assert!(matches!(
            err,
            RenderError::FrameCountMismatch {
                expected: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn empty_dir_is_no_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let err = collect_frames(tmp.path(), 2).unwrap_err();
        assert!(matches!(err, RenderError::NoFrames { .. }));
    }

    #[test]
    fn sequence_parsing() {
        assert_eq!(frame_sequence("deck.001.png"), Some(1));
        assert_eq!(frame_sequence("deck.042.png"), Some(42));
        assert_eq!(frame_sequence("deck.png"), Some(1));
        assert_eq!(frame_sequence("deck.md"), None);
        assert_eq!(frame_sequence("other.001.png"), None);
    }
}
