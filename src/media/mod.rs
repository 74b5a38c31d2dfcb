//! The media backend seam: cutting, audio extraction, probing and subtitle muxing.

use std::path::Path;

use serde::Serialize;

use crate::Result;
use crate::cancel::CancelToken;
use crate::opts::ExtractOpts;
use crate::plan::ClipJob;

pub mod ffmpeg;

#[cfg(test)]
pub(crate) mod fake;

pub use ffmpeg::FfmpegBackend;

/// Title (and mp4 handler name) stamped on the subtitle track this crate muxes in.
pub const CAPTION_TRACK_TITLE: &str = "clipcap";

/// What a probe learned about a media file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaProbe {
    pub duration_seconds: f64,
    pub video_streams: usize,
    pub audio_streams: usize,
    pub subtitle_streams: usize,

    /// Per-type indices (`0:s:<n>`) of subtitle streams tagged [`CAPTION_TRACK_TITLE`].
    pub generated_subtitles: Vec<usize>,
}

impl MediaProbe {
    /// Subtitle streams that came from somewhere else, e.g. source subtitles muxed in
    /// during the cut.
    pub fn foreign_subtitles(&self) -> Vec<usize> {
        (0..self.subtitle_streams)
            .filter(|i| !self.generated_subtitles.contains(i))
            .collect()
    }
}

/// External tool that performs cut, re-encode and mux work.
///
/// Every call blocks until the underlying process exits. Implementations must kill a
/// running process when `cancel` trips and return [`crate::Error::Cancelled`].
pub trait MediaBackend: Send + Sync {
    /// Cut `[start, start + duration)` from the job's source into its output path,
    /// re-encoding video and composing any subtitle input in the same invocation.
    fn cut(&self, job: &ClipJob, opts: &ExtractOpts, cancel: &CancelToken) -> Result<()>;

    /// Decode the audio of `media` into a 16 kHz mono PCM WAV at `wav_out`.
    fn extract_audio(&self, media: &Path, wav_out: &Path, cancel: &CancelToken) -> Result<()>;

    fn probe(&self, media: &Path) -> Result<MediaProbe>;

    /// Stream-copy `clip` into `output` with `srt` added as a soft subtitle track tagged
    /// [`CAPTION_TRACK_TITLE`].
    ///
    /// Other subtitle tracks in `clip` are kept; a previously generated one is replaced.
    fn mux_subtitle(
        &self,
        clip: &Path,
        srt: &Path,
        output: &Path,
        cancel: &CancelToken,
    ) -> Result<()>;

    /// True when `media` already carries a generated caption track.
    fn has_caption_track(&self, media: &Path) -> Result<bool> {
        Ok(!self.probe(media)?.generated_subtitles.is_empty())
    }
}
