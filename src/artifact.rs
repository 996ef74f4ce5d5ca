//! Run-directory layout and ordered artifact handles.
//!
//! Stages never pass bare directories and re-derive ordering from filenames;
//! they exchange handle types ([`Figure`], [`FrameImage`], [`AudioClip`])
//! that carry the slide index as a first-class field. Filename parsing
//! happens exactly once, at the boundary where an external tool's output is
//! collected, and never again downstream.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A figure located by the extractor.
///
/// Invariant: the image file exists before a `Figure` is constructed (the
/// extractor writes and validates the crop first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    /// Service-assigned id, unique within the document.
    pub id: String,
    /// 1-based figure number in document order.
    pub number: usize,
    /// 1-based source page.
    pub page: usize,
    /// Bounding region on the source page: `[x0, y0, x1, y1]`.
    pub region: [f64; 4],
    pub title: String,
    pub caption: String,
    /// Path of the cropped image under the content-addressed figure dir.
    pub image_path: PathBuf,
}

/// One rasterised slide frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameImage {
    /// 1-based slide index.
    pub slide_index: usize,
    pub path: PathBuf,
}

/// One normalised narration clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioClip {
    /// 1-based slide index.
    pub slide_index: usize,
    /// Normalised WAV (16-bit PCM, 44.1 kHz, stereo).
    pub path: PathBuf,
    /// Probed duration. Invariant: > 0.
    pub duration_secs: f64,
}

/// Filesystem layout for one run: every stage writes inside this directory.
///
/// ```text
/// <root>/
///   text.md               normalised document text
///   figures.json          figure metadata sidecar
///   slide_plan.json       the structured slide plan
///   narration_script.txt  human-readable narration
///   deck.md               compiled presentation markup
///   frames/               deck.001.png … (renderer output)
///   audio/                slide01.wav … (normalised clips)
///   video.mp4             final muxed video
///   run.json              run record (statuses, timings, artifacts)
/// ```
#[derive(Debug, Clone)]
pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    /// Create the run directory tree under `root`.
    pub fn create(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("frames"))?;
        std::fs::create_dir_all(root.join("audio"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn text_path(&self) -> PathBuf {
        self.root.join("text.md")
    }

    pub fn figures_path(&self) -> PathBuf {
        self.root.join("figures.json")
    }

    pub fn plan_path(&self) -> PathBuf {
        self.root.join("slide_plan.json")
    }

    pub fn script_path(&self) -> PathBuf {
        self.root.join("narration_script.txt")
    }

    pub fn deck_path(&self) -> PathBuf {
        self.root.join("deck.md")
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.root.join("frames")
    }

    /// Template path handed to marp-cli; it derives `deck.001.png`,
    /// `deck.002.png`, … from the basename.
    pub fn frames_template(&self) -> PathBuf {
        self.frames_dir().join("deck.png")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    /// Normalised clip path for a slide: `audio/slide01.wav`.
    pub fn clip_path(&self, slide_index: usize) -> PathBuf {
        self.audio_dir().join(format!("slide{slide_index:02}.wav"))
    }

    pub fn video_path(&self) -> PathBuf {
        self.root.join("video.mp4")
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join("run.json")
    }
}
