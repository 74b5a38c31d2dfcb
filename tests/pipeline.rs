use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clipcap::cancel::CancelToken;
use clipcap::layout::Layout;
use clipcap::media::{MediaBackend, MediaProbe};
use clipcap::opts::{CaptionOpts, ExtractOpts, RunOpts, SubtitleMode};
use clipcap::pipeline::{CaptionState, ExtractState, Pipeline};
use clipcap::plan::ClipJob;
use clipcap::transcriber::{
    AsrBackend, AsrContext, DRY_RUN_TEXT, Device, TimedUtterance, Transcript,
};
use clipcap::{Error, Result};

const MUXED_MARKER: &[u8] = b"muxed:";
const SOURCE_SUBS_MARKER: &[u8] = b"srcsub:";

/// Writes small marker files instead of running ffmpeg.
///
/// A clip is its body prefixed by one marker per subtitle track: `srcsub:` for soft-muxed
/// source subtitles and `muxed:` for the generated caption track.
#[derive(Default)]
struct FakeMedia {
    fail_index: Option<usize>,
    duration_seconds: f64,
    cuts: AtomicUsize,
    muxes: AtomicUsize,
    audio_extracts: AtomicUsize,
}

impl FakeMedia {
    fn new(duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            ..Self::default()
        }
    }

    fn failing(index: usize) -> Self {
        Self {
            fail_index: Some(index),
            ..Self::new(5.0)
        }
    }
}

impl MediaBackend for FakeMedia {
    fn cut(&self, job: &ClipJob, _opts: &ExtractOpts, _cancel: &CancelToken) -> Result<()> {
        self.cuts.fetch_add(1, Ordering::SeqCst);
        if self.fail_index == Some(job.index) {
            return Err(Error::ExtractionBackend {
                program: "fake-ffmpeg".into(),
                status: "exit status: 1".into(),
                stderr: "boom".into(),
            });
        }
        let mut bytes = Vec::new();
        if job
            .subtitles
            .as_ref()
            .is_some_and(|s| s.mode == SubtitleMode::SoftMux)
        {
            bytes.extend_from_slice(SOURCE_SUBS_MARKER);
        }
        bytes.extend(format!("clip {}", job.index).into_bytes());
        fs::write(&job.output_path, bytes)?;
        Ok(())
    }

    fn extract_audio(&self, _media: &Path, wav_out: &Path, _cancel: &CancelToken) -> Result<()> {
        self.audio_extracts.fetch_add(1, Ordering::SeqCst);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(wav_out, spec).map_err(wav_error)?;
        for _ in 0..1_600 {
            writer.write_sample(0_i16).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;
        Ok(())
    }

    fn probe(&self, media: &Path) -> Result<MediaProbe> {
        let mut rest = fs::read(media)?;
        let mut subtitle_streams = 0;
        let mut generated_subtitles = Vec::new();
        loop {
            if let Some(tail) = rest.strip_prefix(MUXED_MARKER) {
                generated_subtitles.push(subtitle_streams);
                rest = tail.to_vec();
            } else if let Some(tail) = rest.strip_prefix(SOURCE_SUBS_MARKER) {
                rest = tail.to_vec();
            } else {
                break;
            }
            subtitle_streams += 1;
        }
        Ok(MediaProbe {
            duration_seconds: self.duration_seconds,
            video_streams: 1,
            audio_streams: 1,
            subtitle_streams,
            generated_subtitles,
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
        // Source tracks stay ahead of the generated one, which replaces any earlier copy.
        let mut body = fs::read(clip)?;
        let mut sources = Vec::new();
        loop {
            if let Some(tail) = body.strip_prefix(MUXED_MARKER) {
                body = tail.to_vec();
            } else if let Some(tail) = body.strip_prefix(SOURCE_SUBS_MARKER) {
                sources.extend_from_slice(SOURCE_SUBS_MARKER);
                body = tail.to_vec();
            } else {
                break;
            }
        }
        let mut bytes = sources;
        bytes.extend_from_slice(MUXED_MARKER);
        bytes.extend(body);
        fs::write(output, bytes)?;
        Ok(())
    }
}

fn wav_error(err: hound::Error) -> Error {
    Error::Message(err.to_string())
}

/// Returns fixed utterances, deliberately out of order.
struct FakeAsr;

impl AsrBackend for FakeAsr {
    fn transcribe(&self, _samples: &[f32], _language: Option<&str>) -> Result<Transcript> {
        Ok(Transcript {
            language: "en".into(),
            utterances: vec![
                TimedUtterance {
                    start_seconds: 2.0,
                    end_seconds: 3.5,
                    text: "second".into(),
                    words: Vec::new(),
                },
                TimedUtterance {
                    start_seconds: 0.0,
                    end_seconds: 2.5,
                    text: "first".into(),
                    words: Vec::new(),
                },
            ],
        })
    }
}

fn fake_asr(models_dir: &Path) -> AsrContext {
    AsrContext::with_loader(models_dir, false, |_: &Path, _: Device| {
        Ok(Arc::new(FakeAsr) as Arc<dyn AsrBackend>)
    })
}

struct Fixture {
    _dir: tempfile::TempDir,
    layout: Layout,
    models_dir: PathBuf,
}

fn fixture(manifest: &str) -> anyhow::Result<Fixture> {
    let dir = tempfile::tempdir()?;
    let layout = Layout::new(dir.path(), "item42");
    fs::create_dir_all(layout.raw_dir())?;
    fs::write(layout.raw_dir().join("master.mkv"), b"source")?;
    fs::write(layout.manifest_path(), manifest)?;
    let models_dir = dir.path().join("models");
    Ok(Fixture {
        _dir: dir,
        layout,
        models_dir,
    })
}

const THREE_CLIPS: &str = r#"{
  "video_title": "Talk",
  "clips": [
    {"start_time": "0:00", "end_time": "0:10", "title": "Intro"},
    {"start_time": "0:10", "end_time": "0:45", "title": "Main: Part/1"},
    {"start_time": "0:45", "end_time": "1:00:00", "title": "Q&A"}
  ]
}"#;

fn run_opts() -> RunOpts {
    RunOpts {
        workers: 2,
        only: None,
    }
}

fn dry_run_caption() -> CaptionOpts {
    CaptionOpts {
        dry_run: true,
        ..CaptionOpts::default()
    }
}

#[test]
fn one_failed_cut_does_not_stop_the_others() -> anyhow::Result<()> {
    let fx = fixture(THREE_CLIPS)?;
    let media = FakeMedia::failing(2);
    let asr = fake_asr(&fx.models_dir);

    let result = Pipeline::new(&media, &asr).run_layout(
        &fx.layout,
        &ExtractOpts::default(),
        None,
        &run_opts(),
        &CancelToken::new(),
    )?;

    assert_eq!(result.total, 3);
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed_indices(), vec![2]);
    assert!(result.failed[0].1.contains("boom"));
    assert!(!result.all_ok());

    let states: Vec<_> = result.clips.iter().map(|c| c.extract).collect();
    assert_eq!(
        states,
        [
            ExtractState::Extracted,
            ExtractState::ExtractFailed,
            ExtractState::Extracted
        ]
    );

    let final_dir = fx.layout.final_dir();
    assert!(final_dir.join("01_Intro.mkv").is_file());
    assert!(final_dir.join("03_Q_A.mkv").is_file());
    let leftovers: Vec<_> = fs::read_dir(&final_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with('.'))
        .collect();
    assert!(leftovers.is_empty(), "staging files left: {leftovers:?}");
    Ok(())
}

#[test]
fn rerun_skips_existing_clips_and_only_selects_indices() -> anyhow::Result<()> {
    let fx = fixture(THREE_CLIPS)?;
    let media = FakeMedia::new(5.0);
    let asr = fake_asr(&fx.models_dir);
    let pipeline = Pipeline::new(&media, &asr);
    let cancel = CancelToken::new();

    pipeline.run_layout(&fx.layout, &ExtractOpts::default(), None, &run_opts(), &cancel)?;
    assert_eq!(media.cuts.load(Ordering::SeqCst), 3);

    let only = RunOpts {
        workers: 1,
        only: Some(BTreeSet::from([3])),
    };
    let result =
        pipeline.run_layout(&fx.layout, &ExtractOpts::default(), None, &only, &cancel)?;

    assert_eq!(result.total, 1);
    assert_eq!(result.clips[0].index, 3);
    assert!(result.clips[0].reused);
    assert_eq!(media.cuts.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn dry_run_writes_one_cue_spanning_the_clip() -> anyhow::Result<()> {
    let fx = fixture(
        r#"{"clips": [{"start_time": "0:10", "end_time": "0:45", "title": "Intro"}]}"#,
    )?;
    let media = FakeMedia::new(35.0);
    let asr = fake_asr(&fx.models_dir);

    let result = Pipeline::new(&media, &asr).run_layout(
        &fx.layout,
        &ExtractOpts::default(),
        Some(&dry_run_caption()),
        &run_opts(),
        &CancelToken::new(),
    )?;

    assert!(result.all_ok(), "{:?}", result.failed);
    let clip = &result.clips[0];
    assert_eq!(clip.caption, CaptionState::Done);

    let record = clip.caption_record.as_ref().expect("caption record");
    assert_eq!(record.model_name, "dry-run");
    assert!(record.embedded);
    assert_eq!(record.srt_path, fx.layout.final_dir().join("01_Intro.srt"));
    assert_eq!(
        fs::read_to_string(&record.srt_path)?,
        format!("1\n00:00:00,000 --> 00:00:35,000\n{DRY_RUN_TEXT}\n\n")
    );
    assert_eq!(media.audio_extracts.load(Ordering::SeqCst), 0);
    assert!(fs::read(&record.clip_path)?.starts_with(MUXED_MARKER));
    Ok(())
}

#[test]
fn second_embed_without_overwrite_leaves_clip_alone() -> anyhow::Result<()> {
    let fx = fixture(THREE_CLIPS)?;
    let media = FakeMedia::new(5.0);
    let asr = fake_asr(&fx.models_dir);
    let pipeline = Pipeline::new(&media, &asr);
    let cancel = CancelToken::new();
    let caption = dry_run_caption();

    pipeline.run_layout(
        &fx.layout,
        &ExtractOpts::default(),
        Some(&caption),
        &run_opts(),
        &cancel,
    )?;
    assert_eq!(media.muxes.load(Ordering::SeqCst), 3);
    let before = fs::read(fx.layout.final_dir().join("01_Intro.mkv"))?;

    let result = pipeline.run_layout(
        &fx.layout,
        &ExtractOpts::default(),
        Some(&caption),
        &run_opts(),
        &cancel,
    )?;

    assert!(result.all_ok());
    assert_eq!(media.muxes.load(Ordering::SeqCst), 3);
    assert_eq!(fs::read(fx.layout.final_dir().join("01_Intro.mkv"))?, before);
    Ok(())
}

#[test]
fn caption_existing_uses_the_speech_model() -> anyhow::Result<()> {
    let fx = fixture(THREE_CLIPS)?;
    fs::create_dir_all(&fx.models_dir)?;
    fs::write(fx.models_dir.join("ggml-small.bin"), b"model")?;

    let final_dir = fx.layout.final_dir();
    fs::create_dir_all(&final_dir)?;
    fs::write(final_dir.join("01_Intro.mkv"), b"clip")?;
    fs::write(final_dir.join("02_Outro.mp4"), b"clip")?;

    let media = FakeMedia::new(5.0);
    let asr = fake_asr(&fx.models_dir);
    let caption = CaptionOpts {
        embed: false,
        ..CaptionOpts::default()
    };

    let clips = fx.layout.existing_clips()?;
    let result = Pipeline::new(&media, &asr).caption_existing(
        &clips,
        &caption,
        &run_opts(),
        &CancelToken::new(),
    )?;

    assert!(result.all_ok(), "{:?}", result.failed);
    assert_eq!(result.total, 2);
    assert_eq!(media.cuts.load(Ordering::SeqCst), 0);
    assert_eq!(media.muxes.load(Ordering::SeqCst), 0);
    assert_eq!(media.audio_extracts.load(Ordering::SeqCst), 2);

    let record = result.clips[0].caption_record.as_ref().expect("caption record");
    assert_eq!(record.language, "en");
    assert_eq!(record.model_name, "small");
    assert!(!record.embedded);
    assert_eq!(
        fs::read_to_string(final_dir.join("01_Intro.srt"))?,
        "1\n00:00:00,000 --> 00:00:02,500\nfirst\n\n\
         2\n00:00:02,500 --> 00:00:03,500\nsecond\n\n"
    );
    Ok(())
}

#[test]
fn missing_model_fails_captioning_but_keeps_clips() -> anyhow::Result<()> {
    let fx = fixture(THREE_CLIPS)?;
    let media = FakeMedia::new(5.0);
    let asr = fake_asr(&fx.models_dir);

    let result = Pipeline::new(&media, &asr).run_layout(
        &fx.layout,
        &ExtractOpts::default(),
        Some(&CaptionOpts::default()),
        &run_opts(),
        &CancelToken::new(),
    )?;

    assert_eq!(result.succeeded, 0);
    assert_eq!(result.failed_indices(), vec![1, 2, 3]);
    for clip in &result.clips {
        assert_eq!(clip.extract, ExtractState::Extracted);
        assert_eq!(clip.caption, CaptionState::CaptionFailed);
        assert!(clip.clip_path.is_file());
    }
    Ok(())
}

#[test]
fn input_errors_stop_the_run_before_any_cut() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let layout = Layout::new(dir.path(), "missing");
    let media = FakeMedia::new(5.0);
    let asr = fake_asr(dir.path());
    let pipeline = Pipeline::new(&media, &asr);
    let cancel = CancelToken::new();

    let err = pipeline
        .run_layout(&layout, &ExtractOpts::default(), None, &run_opts(), &cancel)
        .unwrap_err();
    assert!(matches!(err, Error::ManifestNotFound { .. }));
    assert!(err.is_fatal());

    fs::create_dir_all(layout.raw_dir())?;
    fs::write(layout.manifest_path(), THREE_CLIPS)?;
    let err = pipeline
        .run_layout(&layout, &ExtractOpts::default(), None, &run_opts(), &cancel)
        .unwrap_err();
    assert!(matches!(err, Error::SourceNotFound { .. }));
    assert_eq!(media.cuts.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn cancelled_run_reports_every_clip_as_failed() -> anyhow::Result<()> {
    let fx = fixture(THREE_CLIPS)?;
    let media = FakeMedia::new(5.0);
    let asr = fake_asr(&fx.models_dir);
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = Pipeline::new(&media, &asr).run_layout(
        &fx.layout,
        &ExtractOpts::default(),
        None,
        &run_opts(),
        &cancel,
    )?;

    assert_eq!(result.total, 3);
    assert_eq!(result.succeeded, 0);
    assert_eq!(media.cuts.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn soft_muxed_clips_still_get_a_caption_track() -> anyhow::Result<()> {
    let fx = fixture(THREE_CLIPS)?;
    fs::write(
        fx.layout.source_subtitle_path(),
        "1\n00:00:01,000 --> 00:00:02,000\nhello\n\n",
    )?;
    let media = FakeMedia::new(5.0);
    let asr = fake_asr(&fx.models_dir);
    let pipeline = Pipeline::new(&media, &asr);
    let cancel = CancelToken::new();
    let extract = ExtractOpts {
        subtitles: SubtitleMode::SoftMux,
        ..ExtractOpts::default()
    };
    let only_first = RunOpts {
        workers: 1,
        only: Some(BTreeSet::from([1])),
    };
    let clip = fx.layout.final_dir().join("01_Intro.mkv");

    let result = pipeline.run_layout(
        &fx.layout,
        &extract,
        Some(&dry_run_caption()),
        &only_first,
        &cancel,
    )?;

    assert!(result.all_ok(), "{:?}", result.failed);
    let record = result.clips[0].caption_record.as_ref().expect("caption record");
    assert!(record.embedded);
    assert_eq!(media.muxes.load(Ordering::SeqCst), 1);
    let probe = media.probe(&clip)?;
    assert_eq!(probe.subtitle_streams, 2);
    assert_eq!(probe.generated_subtitles, vec![1]);
    assert_eq!(probe.foreign_subtitles(), vec![0]);

    pipeline.run_layout(
        &fx.layout,
        &extract,
        Some(&dry_run_caption()),
        &only_first,
        &cancel,
    )?;
    assert_eq!(media.muxes.load(Ordering::SeqCst), 1);
    assert_eq!(media.probe(&clip)?.subtitle_streams, 2);
    Ok(())
}

#[test]
fn reused_subtitle_keeps_the_detected_language() -> anyhow::Result<()> {
    let fx = fixture(THREE_CLIPS)?;
    fs::create_dir_all(&fx.models_dir)?;
    fs::write(fx.models_dir.join("ggml-small.bin"), b"model")?;
    let media = FakeMedia::new(5.0);
    let asr = fake_asr(&fx.models_dir);
    let pipeline = Pipeline::new(&media, &asr);
    let cancel = CancelToken::new();
    let caption = CaptionOpts::default();

    let first = pipeline.run_layout(
        &fx.layout,
        &ExtractOpts::default(),
        Some(&caption),
        &run_opts(),
        &cancel,
    )?;
    assert!(first.all_ok(), "{:?}", first.failed);
    assert_eq!(media.audio_extracts.load(Ordering::SeqCst), 3);

    let second = pipeline.run_layout(
        &fx.layout,
        &ExtractOpts::default(),
        Some(&caption),
        &run_opts(),
        &cancel,
    )?;

    assert!(second.all_ok(), "{:?}", second.failed);
    assert_eq!(media.audio_extracts.load(Ordering::SeqCst), 3);
    for clip in &second.clips {
        let record = clip.caption_record.as_ref().expect("caption record");
        assert_eq!(record.language, "en");
        assert_eq!(record.model_name, "small");
    }
    Ok(())
}
