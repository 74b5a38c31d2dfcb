//! Per-clip orchestration: cut, transcribe, write, embed.
//!
//! Each clip is one job on the bounded pool and walks two small state machines:
//!
//! ```text
//! extract: Pending -> Extracting -> Extracted | ExtractFailed
//! caption: Pending -> Transcribing -> Written -> Embedding -> Done | CaptionFailed
//! ```
//!
//! A failure ends that clip's job and is recorded; other clips carry on. Nothing is retried.
//! Callers re-run with [`RunOpts::only`] set to the failed indices; outputs live at
//! deterministic paths so finished work is detected and skipped.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::captions::{CaptionRecord, CaptionWriter, EmbedOutcome};
use crate::extractor::ClipExtractor;
use crate::layout::{ExistingClip, Layout, subtitle_path_for};
use crate::manifest::SegmentManifest;
use crate::media::MediaBackend;
use crate::opts::{CaptionOpts, ExtractOpts, RunOpts};
use crate::plan::{ClipJob, plan};
use crate::transcriber::{AsrContext, Transcriber, UNDETERMINED_LANGUAGE};
use crate::{Error, Result, pool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractState {
    Pending,
    Extracting,
    Extracted,
    ExtractFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptionState {
    Pending,
    Transcribing,
    Written,
    Embedding,
    Done,
    CaptionFailed,
}

impl fmt::Display for ExtractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for CaptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where one clip ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipReport {
    pub index: usize,
    pub clip_path: PathBuf,
    pub extract: ExtractState,
    pub caption: CaptionState,

    /// The clip was already on disk and was not cut again.
    pub reused: bool,

    pub caption_record: Option<CaptionRecord>,
    pub error: Option<String>,
}

impl ClipReport {
    fn new(index: usize, clip_path: PathBuf) -> Self {
        Self {
            index,
            clip_path,
            extract: ExtractState::Pending,
            caption: CaptionState::Pending,
            reused: false,
            caption_record: None,
            error: None,
        }
    }

    fn extract_to(&mut self, next: ExtractState) {
        tracing::debug!(index = self.index, from = %self.extract, to = %next, "extract state");
        self.extract = next;
    }

    fn caption_to(&mut self, next: CaptionState) {
        tracing::debug!(index = self.index, from = %self.caption, to = %next, "caption state");
        self.caption = next;
    }

    fn fail_extract(&mut self, reason: impl Into<String>) {
        self.extract_to(ExtractState::ExtractFailed);
        self.error = Some(reason.into());
    }

    fn fail_caption(&mut self, reason: impl Into<String>) {
        self.caption_to(CaptionState::CaptionFailed);
        self.error = Some(reason.into());
    }

    /// Every stage that was asked for reached its success state.
    fn succeeded(&self, captioning: bool) -> bool {
        let extracted = self.extract == ExtractState::Extracted;
        let captioned = !captioning || self.caption == CaptionState::Done;
        extracted && captioned && self.error.is_none()
    }
}

/// Aggregate outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub total: usize,
    pub succeeded: usize,

    /// `(index, reason)` for every clip that didn't make it, in index order.
    pub failed: Vec<(usize, String)>,

    pub clips: Vec<ClipReport>,
}

impl RunResult {
    fn from_reports(run_id: String, clips: Vec<ClipReport>, captioning: bool) -> Self {
        let mut succeeded = 0;
        let mut failed = Vec::new();
        for clip in &clips {
            if clip.succeeded(captioning) {
                succeeded += 1;
            } else {
                let reason = clip.error.clone().unwrap_or_else(|| "unknown failure".into());
                failed.push((clip.index, reason));
            }
        }
        Self {
            run_id,
            total: clips.len(),
            succeeded,
            failed,
            clips,
        }
    }

    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }

    /// Indices to hand back through [`RunOpts::only`] for a retry.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed.iter().map(|(i, _)| *i).collect()
    }
}

/// One unit of pool work: a clip to produce (and maybe caption), or an existing clip to
/// caption.
struct ClipTask {
    index: usize,
    clip_path: PathBuf,
    job: Option<ClipJob>,
}

/// The shared, read-only pieces every clip job needs.
struct Stages<'a> {
    extractor: ClipExtractor<'a>,
    writer: CaptionWriter<'a>,
    extract_opts: &'a ExtractOpts,
    caption: Option<CaptionStage<'a>>,
}

struct CaptionStage<'a> {
    /// A model that failed to load fails every clip's captioning, not the run.
    transcriber: std::result::Result<Transcriber<'a>, String>,
    opts: &'a CaptionOpts,
}

/// Sequences extraction and captioning over a clip set.
pub struct Pipeline<'a> {
    media: &'a dyn MediaBackend,
    asr: &'a AsrContext,
}

impl<'a> Pipeline<'a> {
    pub fn new(media: &'a dyn MediaBackend, asr: &'a AsrContext) -> Self {
        Self { media, asr }
    }

    /// Load the manifest and sources from `layout` and run.
    ///
    /// Source subtitles default to the layout's `subtitles.srt` when the extract options
    /// don't name a file.
    pub fn run_layout(
        &self,
        layout: &Layout,
        extract: &ExtractOpts,
        caption: Option<&CaptionOpts>,
        run: &RunOpts,
        cancel: &CancelToken,
    ) -> Result<RunResult> {
        let manifest = SegmentManifest::load(layout.manifest_path())?;
        let sources = layout.available_sources()?;

        let mut extract = extract.clone();
        if extract.subtitle_path.is_none() {
            extract.subtitle_path = Some(layout.source_subtitle_path());
        }

        let out_dir = layout.final_dir();
        self.run(&sources, &manifest, &out_dir, &extract, caption, run, cancel)
    }

    /// Cut every selected segment and, when `caption` is given, caption each clip.
    ///
    /// Input problems (no usable source) are returned as errors before any backend work
    /// starts. Everything after that is reported per clip in the [`RunResult`].
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        available_sources: &[PathBuf],
        manifest: &SegmentManifest,
        out_dir: &Path,
        extract: &ExtractOpts,
        caption: Option<&CaptionOpts>,
        run: &RunOpts,
        cancel: &CancelToken,
    ) -> Result<RunResult> {
        let tasks: Vec<ClipTask> = plan(available_sources, manifest, out_dir, extract)?
            .into_iter()
            .filter(|j| run.includes(j.index))
            .map(|job| ClipTask {
                index: job.index,
                clip_path: job.output_path.clone(),
                job: Some(job),
            })
            .collect();

        let stages = self.stages(extract, caption);
        Ok(execute(&tasks, &stages, run, cancel))
    }

    /// Caption clips already in the output directory without cutting anything.
    pub fn caption_existing(
        &self,
        clips: &[ExistingClip],
        caption: &CaptionOpts,
        run: &RunOpts,
        cancel: &CancelToken,
    ) -> Result<RunResult> {
        let tasks: Vec<ClipTask> = clips
            .iter()
            .filter(|c| run.includes(c.index))
            .map(|c| ClipTask {
                index: c.index,
                clip_path: c.path.clone(),
                job: None,
            })
            .collect();

        let extract = ExtractOpts::default();
        let stages = self.stages(&extract, Some(caption));
        Ok(execute(&tasks, &stages, run, cancel))
    }

    fn stages<'s>(
        &self,
        extract: &'s ExtractOpts,
        caption: Option<&'s CaptionOpts>,
    ) -> Stages<'s>
    where
        'a: 's,
    {
        let caption = caption.map(|opts| {
            let transcriber = Transcriber::new(self.media, self.asr, opts).map_err(|e| {
                tracing::error!(error = %e, model = %opts.model, "speech model unavailable");
                e.to_string()
            });
            CaptionStage { transcriber, opts }
        });

        Stages {
            extractor: ClipExtractor::new(self.media),
            writer: CaptionWriter::new(self.media),
            extract_opts: extract,
            caption,
        }
    }
}

fn execute(
    tasks: &[ClipTask],
    stages: &Stages<'_>,
    run: &RunOpts,
    cancel: &CancelToken,
) -> RunResult {
    let run_id = Uuid::new_v4().to_string();
    let run_span = tracing::info_span!("run", run_id = %run_id);
    let captioning = stages.caption.is_some();
    let started = Instant::now();

    tracing::info!(
        parent: &run_span,
        clips = tasks.len(),
        workers = run.workers,
        captioning,
        "run started"
    );

    let results = pool::run_bounded(tasks, run.workers, cancel, |task| {
        let span = tracing::info_span!(parent: &run_span, "clip", index = task.index);
        let _enter = span.enter();
        stages.process(task, cancel)
    });

    let reports: Vec<ClipReport> = tasks
        .iter()
        .zip(results)
        .map(|(task, r)| r.unwrap_or_else(|| Stages::cancelled(task)))
        .collect();

    let result = RunResult::from_reports(run_id, reports, captioning);
    tracing::info!(
        parent: &run_span,
        total = result.total,
        succeeded = result.succeeded,
        failed = result.failed.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "run finished"
    );
    result
}

impl Stages<'_> {
    fn process(&self, task: &ClipTask, cancel: &CancelToken) -> ClipReport {
        let mut report = ClipReport::new(task.index, task.clip_path.clone());

        match &task.job {
            Some(job) => {
                report.extract_to(ExtractState::Extracting);
                let outcome = self.extractor.extract_job(job, self.extract_opts, cancel);
                if !outcome.ok {
                    let reason = outcome.error.unwrap_or_else(|| "extraction failed".into());
                    report.fail_extract(reason);
                    return report;
                }
                report.reused = outcome.skipped;
            }
            None => report.reused = true,
        }
        report.extract_to(ExtractState::Extracted);

        if let Some(stage) = &self.caption {
            match self.caption_clip(stage, &task.clip_path, &mut report, cancel) {
                Ok(record) => {
                    report.caption_record = Some(record);
                    report.caption_to(CaptionState::Done);
                }
                Err(reason) => {
                    tracing::warn!(
                        clip = %task.clip_path.display(),
                        error = %reason,
                        "captioning failed"
                    );
                    report.fail_caption(reason);
                }
            }
        }

        report
    }

    /// Report for a task the pool never started.
    fn cancelled(task: &ClipTask) -> ClipReport {
        let mut report = ClipReport::new(task.index, task.clip_path.clone());
        if task.job.is_some() {
            report.fail_extract(Error::Cancelled.to_string());
        } else {
            report.reused = true;
            report.extract = ExtractState::Extracted;
            report.fail_caption(Error::Cancelled.to_string());
        }
        report
    }

    fn caption_clip(
        &self,
        stage: &CaptionStage<'_>,
        clip: &Path,
        report: &mut ClipReport,
        cancel: &CancelToken,
    ) -> std::result::Result<CaptionRecord, String> {
        let opts = stage.opts;
        let srt = subtitle_path_for(clip);

        let model_name = if opts.dry_run {
            "dry-run".to_owned()
        } else {
            opts.model.name().to_owned()
        };

        report.caption_to(CaptionState::Transcribing);
        let (language, model_name) = if srt.is_file() && !opts.overwrite {
            tracing::info!(srt = %srt.display(), "subtitle file exists, not transcribing again");
            let saved = CaptionRecord::load(clip).unwrap_or_else(|err| {
                tracing::warn!(clip = %clip.display(), error = %err, "ignoring caption record");
                None
            });
            match saved {
                Some(saved) => (saved.language, saved.model_name),
                None => (
                    opts.language.clone().unwrap_or_else(|| UNDETERMINED_LANGUAGE.to_owned()),
                    model_name,
                ),
            }
        } else {
            let transcriber = stage.transcriber.as_ref().map_err(|e| e.clone())?;
            let started = Instant::now();
            let transcript = transcriber
                .transcribe(clip, cancel)
                .map_err(|e| e.to_string())?;
            CaptionWriter::write_subtitle_file(&srt, &transcript.utterances)
                .map_err(|e| e.to_string())?;
            tracing::info!(
                srt = %srt.display(),
                cues = transcript.utterances.len(),
                language = %transcript.language,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "subtitle written"
            );
            (transcript.language, model_name)
        };
        report.caption_to(CaptionState::Written);

        let mut record =
            CaptionRecord::new(clip, &srt, language, model_name).map_err(|e| e.to_string())?;

        if opts.embed {
            report.caption_to(CaptionState::Embedding);
            let outcome = self
                .writer
                .embed(clip, &srt, clip, opts.overwrite, cancel)
                .map_err(|e| e.to_string())?;
            if outcome == EmbedOutcome::AlreadyPresent {
                tracing::info!(clip = %clip.display(), "subtitle track already embedded");
            }
            record.embedded = true;
        }

        if let Err(err) = record.save() {
            tracing::warn!(clip = %clip.display(), error = %err, "could not save caption record");
        }
        Ok(record)
    }
}
