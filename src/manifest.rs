use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, timecode};

/// One clip boundary from the manifest, already validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// 1-based position in the manifest. Output numbering follows it.
    pub index: usize,
    pub start_seconds: u64,
    pub end_seconds: u64,
    pub title: String,
}

impl Segment {
    /// Always positive after validation.
    pub fn duration_seconds(&self) -> u64 {
        self.end_seconds - self.start_seconds
    }

    /// The title reduced to a filesystem-safe token.
    pub fn sanitized_title(&self) -> String {
        sanitize_title(&self.title)
    }
}

/// The validated list of clips to cut from one source video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentManifest {
    pub video_title: String,
    pub clips: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    video_title: Option<String>,
    #[serde(default)]
    clips: Option<Vec<RawSegment>>,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl SegmentManifest {
    /// Read and validate a manifest file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::ManifestNotFound {
                    path: path.to_owned(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let manifest = Self::parse_at(path, &text)?;
        tracing::debug!(
            path = %path.display(),
            clips = manifest.clips.len(),
            "loaded segment manifest"
        );
        Ok(manifest)
    }

    /// Validate a manifest held in memory.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::parse_at(Path::new("<inline>"), json)
    }

    fn parse_at(path: &Path, json: &str) -> Result<Self> {
        let raw: RawManifest =
            serde_json::from_str(json).map_err(|source| Error::ManifestParse {
                path: PathBuf::from(path),
                source,
            })?;
        validate(raw)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

fn validate(raw: RawManifest) -> Result<SegmentManifest> {
    let raw_clips = raw.clips.unwrap_or_default();
    if raw_clips.is_empty() {
        return Err(Error::ManifestValidation("'clips' is empty".into()));
    }

    let mut clips = Vec::with_capacity(raw_clips.len());
    for (i, seg) in raw_clips.into_iter().enumerate() {
        let index = i + 1;

        let title = seg
            .title
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::ManifestValidation(format!("clip {index} has no title")))?;

        let start = required_time(index, "start_time", seg.start_time)?;
        let end = required_time(index, "end_time", seg.end_time)?;
        if end <= start {
            return Err(Error::ManifestValidation(format!(
                "clip {index} ('{title}') ends at {} which is not after its start {}",
                timecode::format(end),
                timecode::format(start)
            )));
        }

        clips.push(Segment {
            index,
            start_seconds: start,
            end_seconds: end,
            title,
        });
    }

    Ok(SegmentManifest {
        video_title: raw.video_title.unwrap_or_default(),
        clips,
    })
}

fn required_time(index: usize, field: &str, value: Option<String>) -> Result<u64> {
    let text = value
        .ok_or_else(|| Error::ManifestValidation(format!("clip {index} has no {field}")))?;
    timecode::parse(&text)
}

/// Reduce a title to a token that is safe inside a file name.
///
/// Alphanumerics, `-` and `_` survive. Whitespace and every other character become `_`,
/// runs of `_` collapse, and leading/trailing separators are stripped. Titles that reduce
/// to nothing become `clip`; the index prefix on the file name keeps such clips apart.
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        let c = if c.is_alphanumeric() || c == '-' || c == '_' {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '-');
    if trimmed.is_empty() {
        "clip".to_owned()
    } else {
        trimmed.to_owned()
    }
}
