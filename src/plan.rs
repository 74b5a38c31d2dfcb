//! Turning a validated manifest into concrete cut jobs.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::layout::clip_file_name;
use crate::manifest::SegmentManifest;
use crate::opts::{ExtractOpts, SubtitleMode};
use crate::{Error, Result};

/// A subtitle file to compose into the cut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtitleInput {
    pub path: PathBuf,
    pub mode: SubtitleMode,
}

/// Everything the media backend needs to produce one clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipJob {
    pub index: usize,
    pub sanitized_title: String,
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub start_seconds: u64,
    pub duration_seconds: u64,
    pub subtitles: Option<SubtitleInput>,
}

impl ClipJob {
    pub fn use_subtitles(&self) -> bool {
        self.subtitles.is_some()
    }
}

/// Pick the source to cut from: the first candidate that exists as a file.
///
/// Candidates are expected best-first, as [`crate::layout::Layout::available_sources`]
/// returns them.
pub fn select_source(available_sources: &[PathBuf]) -> Result<PathBuf> {
    available_sources
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| Error::SourceNotFound {
            path: available_sources
                .first()
                .cloned()
                .unwrap_or_else(|| PathBuf::from("<no candidates>")),
        })
}

/// Build one job per manifest segment, in manifest order.
///
/// Pure apart from checking which files exist. Output paths are
/// `<out_dir>/{index:02}_{title}.{ext}`, unique per index.
pub fn plan(
    available_sources: &[PathBuf],
    manifest: &SegmentManifest,
    out_dir: &Path,
    opts: &ExtractOpts,
) -> Result<Vec<ClipJob>> {
    let source = select_source(available_sources)?;
    let subtitles = subtitle_input(opts);

    let jobs = manifest
        .clips
        .iter()
        .map(|seg| {
            let sanitized_title = seg.sanitized_title();
            ClipJob {
                index: seg.index,
                output_path: out_dir.join(clip_file_name(
                    seg.index,
                    &sanitized_title,
                    &opts.container_ext,
                )),
                sanitized_title,
                source_path: source.clone(),
                start_seconds: seg.start_seconds,
                duration_seconds: seg.duration_seconds(),
                subtitles: subtitles.clone(),
            }
        })
        .collect();

    Ok(jobs)
}

fn subtitle_input(opts: &ExtractOpts) -> Option<SubtitleInput> {
    if opts.subtitles == SubtitleMode::None {
        return None;
    }

    match &opts.subtitle_path {
        Some(path) if path.is_file() => Some(SubtitleInput {
            path: path.clone(),
            mode: opts.subtitles,
        }),
        Some(path) => {
            tracing::warn!(
                path = %path.display(),
                "source subtitles requested but not found; cutting without them"
            );
            None
        }
        None => {
            tracing::warn!("source subtitles requested but no subtitle file configured");
            None
        }
    }
}
