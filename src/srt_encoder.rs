use std::io::Write;

use crate::transcriber::TimedUtterance;
use crate::{Error, Result};

/// Streams utterances out as SubRip cues.
///
/// Cues are numbered from 1 in write order. Utterances with no visible text are dropped
/// without consuming a number, since an empty cue body would end the block early for most
/// parsers.
pub struct SrtEncoder<W: Write> {
    /// The underlying writer we stream SRT into.
    w: W,

    /// Number given to the next cue written.
    next_index: usize,

    /// Whether the encoder has been closed.
    closed: bool,
}

impl<W: Write> SrtEncoder<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            next_index: 1,
            closed: false,
        }
    }

    /// Write a single cue.
    pub fn write_utterance(&mut self, utterance: &TimedUtterance) -> Result<()> {
        if self.closed {
            return Err(Error::msg("cannot write cue: encoder is already closed"));
        }

        let text = cue_text(&utterance.text);
        if text.is_empty() {
            return Ok(());
        }

        let start = format_timestamp_srt(utterance.start_seconds);
        let end = format_timestamp_srt(utterance.end_seconds);

        writeln!(&mut self.w, "{}", self.next_index)?;
        writeln!(&mut self.w, "{start} --> {end}")?;
        writeln!(&mut self.w, "{text}")?;
        writeln!(&mut self.w)?;
        self.next_index += 1;

        Ok(())
    }

    /// Cues written so far.
    pub fn cue_count(&self) -> usize {
        self.next_index - 1
    }

    /// Flush the underlying writer. This is idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.w.flush()?;
        self.closed = true;
        Ok(())
    }
}

/// Trim every line and drop blank ones; a blank line inside a cue would terminate it.
fn cue_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format seconds as a SubRip timestamp (`HH:MM:SS,mmm`).
///
/// Rounds to the nearest millisecond. Negative input clamps to zero.
pub fn format_timestamp_srt(seconds: f64) -> String {
    let total_ms = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    };

    let ms = total_ms % 1000;
    let total_s = total_ms / 1000;

    let s = total_s % 60;
    let total_m = total_s / 60;

    let m = total_m % 60;
    let h = total_m / 60;

    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}
