//! On-disk layout for one item: `raw_assets/<id>/` in, `final_output/<id>/` out.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::Result;

/// Extensions recognised as video containers, in preference order for source discovery.
pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "mov", "webm"];

/// Extensions produced for clips.
pub const CLIP_EXTENSIONS: &[&str] = &["mkv", "mp4", "mov"];

const RAW_DIR: &str = "raw_assets";
const FINAL_DIR: &str = "final_output";
const MANIFEST_FILE: &str = "transcripts.json";
const SOURCE_SUBTITLES_FILE: &str = "subtitles.srt";
const PREFERRED_MASTERS: &[&str] = &["master_fixed.mkv", "master.mkv"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    base_dir: PathBuf,
    item_id: String,
}

/// A clip already present in the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingClip {
    pub index: usize,
    pub path: PathBuf,
}

impl Layout {
    pub fn new(base_dir: impl Into<PathBuf>, item_id: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            item_id: item_id.into(),
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.base_dir.join(RAW_DIR).join(&self.item_id)
    }

    pub fn final_dir(&self) -> PathBuf {
        self.base_dir.join(FINAL_DIR).join(&self.item_id)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.raw_dir().join(MANIFEST_FILE)
    }

    /// Subtitles that came with the source download, if any were fetched.
    pub fn source_subtitle_path(&self) -> PathBuf {
        self.raw_dir().join(SOURCE_SUBTITLES_FILE)
    }

    /// Video files in the raw directory, best candidate first.
    ///
    /// `master_fixed.mkv` beats `master.mkv`; everything else follows by extension
    /// preference and then by name. A missing directory yields an empty list.
    pub fn available_sources(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for path in read_dir_files(&self.raw_dir())? {
            if extension_rank(&path, VIDEO_EXTENSIONS).is_some() {
                found.push(path);
            }
        }

        found.sort_by_key(|p| {
            let name = file_name(p);
            let preferred = PREFERRED_MASTERS
                .iter()
                .position(|m| *m == name)
                .unwrap_or(PREFERRED_MASTERS.len());
            let ext = extension_rank(p, VIDEO_EXTENSIONS).unwrap_or(usize::MAX);
            (preferred, ext, name)
        });
        Ok(found)
    }

    /// Clips in the output directory named `NN_<title>.<ext>`, ordered by index.
    pub fn existing_clips(&self) -> Result<Vec<ExistingClip>> {
        let mut clips = Vec::new();
        for path in read_dir_files(&self.final_dir())? {
            if extension_rank(&path, CLIP_EXTENSIONS).is_none() {
                continue;
            }
            if let Some(index) = clip_index(&path) {
                clips.push(ExistingClip { index, path });
            }
        }
        clips.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.path.cmp(&b.path)));
        Ok(clips)
    }

    pub fn clip_path(&self, index: usize, sanitized_title: &str, ext: &str) -> PathBuf {
        self.final_dir()
            .join(clip_file_name(index, sanitized_title, ext))
    }
}

/// `{index:02}_{title}.{ext}`
pub fn clip_file_name(index: usize, sanitized_title: &str, ext: &str) -> String {
    format!("{index:02}_{sanitized_title}.{ext}")
}

/// The subtitle file that sits next to a clip: same stem, `.srt` extension.
pub fn subtitle_path_for(clip: &Path) -> PathBuf {
    clip.with_extension("srt")
}

/// The caption record saved next to a clip: `<stem>.caption.json`.
pub fn caption_record_path_for(clip: &Path) -> PathBuf {
    clip.with_extension("caption.json")
}

/// Leading `NN_` index of a clip file name.
pub fn clip_index(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let (digits, rest) = stem.split_once('_')?;
    if digits.is_empty() || rest.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|i| *i > 0)
}

fn extension_rank(path: &Path, exts: &[&str]) -> Option<usize> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    exts.iter().position(|e| *e == ext)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_dir_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}
