//! Subtitle files and soft-track embedding.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::layout::{caption_record_path_for, subtitle_path_for};
use crate::media::MediaBackend;
use crate::srt_encoder::SrtEncoder;
use crate::transcriber::TimedUtterance;
use crate::{Error, Result};

/// Outcome of an [`CaptionWriter::embed`] call that didn't fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbedOutcome {
    /// The backend ran and the output now carries the subtitle track.
    Embedded,

    /// The output already had what was asked for; nothing ran.
    AlreadyPresent,
}

/// Record of one captioned clip.
///
/// Saved beside the clip as `<stem>.caption.json` so a later run that reuses the subtitle
/// file still knows its language and model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionRecord {
    pub clip_path: PathBuf,
    pub srt_path: PathBuf,
    pub embedded: bool,
    pub language: String,
    pub model_name: String,
}

impl CaptionRecord {
    /// Pair a clip with its subtitle file, which must sit beside it with the same stem.
    pub fn new(
        clip_path: impl Into<PathBuf>,
        srt_path: impl Into<PathBuf>,
        language: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Result<Self> {
        let clip_path = clip_path.into();
        let srt_path = srt_path.into();
        if subtitle_path_for(&clip_path) != srt_path {
            return Err(Error::CaptionMismatch {
                clip: clip_path,
                srt: srt_path,
            });
        }
        Ok(Self {
            clip_path,
            srt_path,
            embedded: false,
            language: language.into(),
            model_name: model_name.into(),
        })
    }

    /// Write the record next to its clip.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::msg(format!("failed to encode caption record: {e}")))?;
        write_atomically(&caption_record_path_for(&self.clip_path), ".json", &json)
    }

    /// The record saved for `clip`, if any.
    pub fn load(clip: &Path) -> Result<Option<Self>> {
        let path = caption_record_path_for(clip);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record: Self = serde_json::from_slice(&bytes).map_err(|e| {
            Error::msg(format!("caption record {} is unreadable: {e}", path.display()))
        })?;
        Ok(Some(record))
    }
}

/// Turns utterances into SubRip and muxes it into clips.
pub struct CaptionWriter<'a> {
    media: &'a dyn MediaBackend,
}

impl<'a> CaptionWriter<'a> {
    pub fn new(media: &'a dyn MediaBackend) -> Self {
        Self { media }
    }

    /// Render utterances as SubRip text.
    pub fn write_subtitle(utterances: &[TimedUtterance]) -> Result<String> {
        let mut out = Vec::new();
        let mut enc = SrtEncoder::new(&mut out);
        for u in utterances {
            enc.write_utterance(u)?;
        }
        enc.close()?;
        String::from_utf8(out)
            .map_err(|e| Error::msg(format!("subtitle text is not UTF-8: {e}")))
    }

    /// Write the subtitle file, replacing any file already at `path` atomically.
    pub fn write_subtitle_file(path: &Path, utterances: &[TimedUtterance]) -> Result<()> {
        let text = Self::write_subtitle(utterances)?;
        write_atomically(path, ".srt", text.as_bytes())
    }

    /// Mux `subtitle` into `clip` as a soft track, writing `output`.
    ///
    /// Media streams are copied, only the subtitle is converted. When `output` is the clip
    /// itself the mux goes through a temporary file in the same directory that then
    /// replaces the clip.
    ///
    /// With `overwrite` off this is a no-op returning [`EmbedOutcome::AlreadyPresent`] if
    /// the target already exists, or for in-place targets, already carries a generated
    /// caption track. Subtitle tracks from elsewhere don't count and are kept.
    pub fn embed(
        &self,
        clip: &Path,
        subtitle: &Path,
        output: &Path,
        overwrite: bool,
        cancel: &CancelToken,
    ) -> Result<EmbedOutcome> {
        let in_place = same_file(clip, output);

        if !overwrite {
            let present = if in_place {
                self.media
                    .has_caption_track(clip)
                    .map_err(|e| embed_error(clip, e))?
            } else {
                output.exists()
            };
            if present {
                tracing::debug!(clip = %clip.display(), "subtitle track already present");
                return Ok(EmbedOutcome::AlreadyPresent);
            }
        }

        if !subtitle.is_file() {
            return Err(Error::Embed {
                clip: clip.to_owned(),
                reason: format!("subtitle file {} does not exist", subtitle.display()),
            });
        }

        let dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let suffix = output
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let tmp = tempfile::Builder::new()
            .prefix(".clipcap-embed-")
            .suffix(&suffix)
            .tempfile_in(dir)?;

        self.media
            .mux_subtitle(clip, subtitle, tmp.path(), cancel)
            .map_err(|e| embed_error(clip, e))?;

        tmp.persist(output).map_err(|e| Error::Embed {
            clip: clip.to_owned(),
            reason: format!("failed to move muxed file into place: {}", e.error),
        })?;

        Ok(EmbedOutcome::Embedded)
    }
}

fn write_atomically(path: &Path, suffix: &str, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(".clipcap-")
        .suffix(suffix)
        .tempfile_in(dir)?;
    fs::write(tmp.path(), bytes)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn embed_error(clip: &Path, err: Error) -> Error {
    match err {
        Error::Cancelled | Error::Embed { .. } => err,
        other => Error::Embed {
            clip: clip.to_owned(),
            reason: other.to_string(),
        },
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
