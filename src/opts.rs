use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;

use crate::transcriber::{Device, ModelTier};

/// How subtitles that ship with the source are carried into a clip during the cut.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum SubtitleMode {
    /// Ignore source subtitles.
    #[default]
    None,

    /// Render them into the video frames.
    BurnIn,

    /// Add them as a selectable track.
    SoftMux,
}

/// Video re-encode settings for cuts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEncoder {
    pub codec: String,
    pub preset: String,
    pub crf: u8,
}

impl Default for VideoEncoder {
    fn default() -> Self {
        Self {
            codec: "libx264".to_owned(),
            preset: "ultrafast".to_owned(),
            crf: 18,
        }
    }
}

/// Options for cutting clips out of a source.
///
/// This struct represents *library-level configuration*, not CLI flags directly.
/// The CLI maps user input into it so other frontends (tests, batch jobs) can build it
/// programmatically.
#[derive(Debug, Clone)]
pub struct ExtractOpts {
    /// Container extension for produced clips (`mkv`, `mp4`, `mov`).
    pub container_ext: String,

    /// Whether and how to carry source subtitles into each clip.
    pub subtitles: SubtitleMode,

    /// Source subtitle file. Ignored when `subtitles` is `None`, and treated as
    /// unavailable when the file doesn't exist.
    pub subtitle_path: Option<PathBuf>,

    /// Re-cut clips whose output file already exists.
    pub overwrite: bool,

    pub encoder: VideoEncoder,

    pub audio_codec: String,
}

impl Default for ExtractOpts {
    fn default() -> Self {
        Self {
            container_ext: "mkv".to_owned(),
            subtitles: SubtitleMode::None,
            subtitle_path: None,
            overwrite: false,
            encoder: VideoEncoder::default(),
            audio_codec: "aac".to_owned(),
        }
    }
}

/// Options for the captioning step.
#[derive(Debug, Clone)]
pub struct CaptionOpts {
    /// Quality/speed tier of the speech model.
    pub model: ModelTier,

    /// CPU or accelerated inference. Accelerated never silently falls back to CPU.
    pub device: Device,

    /// Optional language hint (e.g. `"en"`). `None` lets the model detect it.
    pub language: Option<String>,

    /// Mux the subtitle file into the clip as a soft track.
    pub embed: bool,

    /// Redo subtitle files and embeds that already exist.
    pub overwrite: bool,

    /// Skip speech recognition and write a placeholder cue spanning the clip.
    pub dry_run: bool,

    /// Split each recognised segment into cues of at most this many words, using the
    /// model's word timings. `None` keeps one cue per segment.
    pub words_per_cue: Option<usize>,
}

impl Default for CaptionOpts {
    fn default() -> Self {
        Self {
            model: ModelTier::Small,
            device: Device::Cpu,
            language: None,
            embed: true,
            overwrite: false,
            dry_run: false,
            words_per_cue: None,
        }
    }
}

/// Scheduling options for a whole run.
#[derive(Debug, Clone)]
pub struct RunOpts {
    /// Concurrent clip jobs.
    pub workers: usize,

    /// Restrict the run to these 1-based clip indices.
    pub only: Option<BTreeSet<usize>>,
}

impl Default for RunOpts {
    fn default() -> Self {
        Self {
            workers: crate::pool::default_workers(),
            only: None,
        }
    }
}

impl RunOpts {
    pub fn includes(&self, index: usize) -> bool {
        self.only.as_ref().is_none_or(|set| set.contains(&index))
    }
}
