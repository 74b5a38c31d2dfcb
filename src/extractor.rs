use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::manifest::SegmentManifest;
use crate::media::MediaBackend;
use crate::opts::ExtractOpts;
use crate::plan::{ClipJob, plan};
use crate::{Error, Result, pool, timecode};

/// Result of cutting one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipOutcome {
    pub index: usize,
    pub output_path: PathBuf,
    pub ok: bool,

    /// The output already existed and `overwrite` was off.
    pub skipped: bool,

    pub error: Option<String>,
}

impl ClipOutcome {
    fn failed(job: &ClipJob, err: &Error) -> Self {
        Self {
            index: job.index,
            output_path: job.output_path.clone(),
            ok: false,
            skipped: false,
            error: Some(err.to_string()),
        }
    }
}

/// True only if every segment produced a clip.
pub fn extract_all_ok(outcomes: &[ClipOutcome]) -> bool {
    outcomes.iter().all(|o| o.ok)
}

/// Cuts manifest segments out of a source video.
pub struct ClipExtractor<'a> {
    media: &'a dyn MediaBackend,
    workers: usize,
}

impl<'a> ClipExtractor<'a> {
    pub fn new(media: &'a dyn MediaBackend) -> Self {
        Self {
            media,
            workers: pool::default_workers(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Cut every segment of `manifest` from `source_path` into `out_dir`.
    ///
    /// A missing source is an input error and nothing is cut. After that, each segment
    /// stands alone: a failed cut is recorded in its outcome and the rest carry on.
    pub fn extract(
        &self,
        source_path: &Path,
        manifest: &SegmentManifest,
        out_dir: &Path,
        opts: &ExtractOpts,
        cancel: &CancelToken,
    ) -> Result<Vec<ClipOutcome>> {
        let jobs = plan(&[source_path.to_owned()], manifest, out_dir, opts)?;

        let results = pool::run_bounded(&jobs, self.workers, cancel, |job| {
            self.extract_job(job, opts, cancel)
        });

        let outcomes: Vec<ClipOutcome> = jobs
            .iter()
            .zip(results)
            .map(|(job, r)| r.unwrap_or_else(|| ClipOutcome::failed(job, &Error::Cancelled)))
            .collect();

        let ok = outcomes.iter().filter(|o| o.ok).count();
        tracing::info!(total = outcomes.len(), ok, "extraction finished");
        Ok(outcomes)
    }

    /// Cut one job. Never fails outright; failures land in the outcome.
    pub fn extract_job(
        &self,
        job: &ClipJob,
        opts: &ExtractOpts,
        cancel: &CancelToken,
    ) -> ClipOutcome {
        match self.try_extract_job(job, opts, cancel) {
            Ok(skipped) => ClipOutcome {
                index: job.index,
                output_path: job.output_path.clone(),
                ok: true,
                skipped,
                error: None,
            },
            Err(err) => {
                tracing::warn!(
                    index = job.index,
                    output = %job.output_path.display(),
                    error = %err,
                    "clip extraction failed"
                );
                ClipOutcome::failed(job, &err)
            }
        }
    }

    fn try_extract_job(
        &self,
        job: &ClipJob,
        opts: &ExtractOpts,
        cancel: &CancelToken,
    ) -> Result<bool> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if job.output_path.exists() && !opts.overwrite {
            tracing::info!(
                index = job.index,
                output = %job.output_path.display(),
                "clip exists, skipping"
            );
            return Ok(true);
        }

        if !job.source_path.is_file() {
            return Err(Error::SourceNotFound {
                path: job.source_path.clone(),
            });
        }

        let dir = job
            .output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;

        // Cut into a temporary sibling so an interrupted cut never looks like a finished clip.
        let suffix = format!(".{}", opts.container_ext);
        let tmp = tempfile::Builder::new()
            .prefix(".clipcap-cut-")
            .suffix(&suffix)
            .tempfile_in(dir)?;
        let staged = ClipJob {
            output_path: tmp.path().to_owned(),
            ..job.clone()
        };

        tracing::info!(
            index = job.index,
            title = %job.sanitized_title,
            start = %timecode::format(job.start_seconds),
            duration = job.duration_seconds,
            subtitles = job.use_subtitles(),
            "cutting clip"
        );
        let started = Instant::now();
        self.media.cut(&staged, opts, cancel)?;

        tmp.persist(&job.output_path).map_err(|e| Error::Io(e.error))?;

        tracing::info!(
            index = job.index,
            output = %job.output_path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "clip extracted"
        );
        Ok(false)
    }
}
