//! In-memory stand-in for ffmpeg used by unit tests.
//!
//! Clips are small text files. A generated caption track is recorded as a `muxed:` prefix,
//! so probing a file tells whether it was muxed before.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{MediaBackend, MediaProbe};
use crate::cancel::CancelToken;
use crate::opts::ExtractOpts;
use crate::plan::ClipJob;
use crate::{Error, Result};

pub(crate) const MUXED_MARKER: &str = "muxed:";

#[derive(Default)]
pub(crate) struct FakeMedia {
    pub fail_cut: Option<usize>,
    pub fail_mux: bool,
    pub duration_seconds: f64,
    pub cuts: AtomicUsize,
    pub muxes: AtomicUsize,
}

impl FakeMedia {
    pub fn cuts(&self) -> usize {
        self.cuts.load(Ordering::SeqCst)
    }

    pub fn muxes(&self) -> usize {
        self.muxes.load(Ordering::SeqCst)
    }
}

impl MediaBackend for FakeMedia {
    fn cut(&self, job: &ClipJob, _opts: &ExtractOpts, _cancel: &CancelToken) -> Result<()> {
        self.cuts.fetch_add(1, Ordering::SeqCst);
        if self.fail_cut == Some(job.index) {
            return Err(Error::ExtractionBackend {
                program: "ffmpeg".into(),
                status: "exit status: 1".into(),
                stderr: format!("cannot cut clip {}", job.index),
            });
        }
        fs::write(&job.output_path, format!("clip {}", job.index))?;
        Ok(())
    }

    fn extract_audio(&self, _media: &Path, _wav_out: &Path, _cancel: &CancelToken) -> Result<()> {
        Err(Error::msg("audio extraction is not faked"))
    }

    fn probe(&self, media: &Path) -> Result<MediaProbe> {
        let text = fs::read_to_string(media)?;
        let muxed = text.starts_with(MUXED_MARKER);
        Ok(MediaProbe {
            duration_seconds: self.duration_seconds,
            video_streams: 1,
            audio_streams: 1,
            subtitle_streams: usize::from(muxed),
            generated_subtitles: if muxed { vec![0] } else { Vec::new() },
        })
    }

    fn mux_subtitle(
        &self,
        clip: &Path,
        _srt: &Path,
        output: &Path,
        _cancel: &CancelToken,
    ) -> Result<()> {
        self.muxes.fetch_add(1, Ordering::SeqCst);
        if self.fail_mux {
            return Err(Error::ExtractionBackend {
                program: "ffmpeg".into(),
                status: "exit status: 1".into(),
                stderr: "Subtitle codec not supported".into(),
            });
        }
        let body = fs::read_to_string(clip)?;
        fs::write(output, format!("{MUXED_MARKER}{body}"))?;
        Ok(())
    }
}
