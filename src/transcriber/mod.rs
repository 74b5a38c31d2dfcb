//! Speech recognition over produced clips.
//!
//! The model cache and device availability live in an explicit [`AsrContext`] handed to
//! each [`Transcriber`], so two runs with different models or devices never share state.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::media::MediaBackend;
use crate::opts::CaptionOpts;
use crate::{Error, Result, wav};

pub mod whisper;

/// Text written for every dry-run clip.
pub const DRY_RUN_TEXT: &str = "[DRY-RUN] placeholder";

/// Language reported when nothing better is known.
pub const UNDETERMINED_LANGUAGE: &str = "und";

/// Speech model quality/speed tiers, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum ModelTier {
    Tiny,
    Base,
    Small,
    Medium,
    LargeV3,
    LargeV3Turbo,
}

impl ModelTier {
    pub const ALL: [ModelTier; 6] = [
        ModelTier::Tiny,
        ModelTier::Base,
        ModelTier::Small,
        ModelTier::Medium,
        ModelTier::LargeV3,
        ModelTier::LargeV3Turbo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModelTier::Tiny => "tiny",
            ModelTier::Base => "base",
            ModelTier::Small => "small",
            ModelTier::Medium => "medium",
            ModelTier::LargeV3 => "large-v3",
            ModelTier::LargeV3Turbo => "large-v3-turbo",
        }
    }

    /// ggml model file name for this tier.
    pub fn filename(self) -> String {
        format!("ggml-{}.bin", self.name())
    }

    /// Download location in whisper.cpp's model repository.
    pub fn url(self) -> String {
        format!(
            "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/{}",
            self.filename()
        )
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        ModelTier::ALL
            .into_iter()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| Error::msg(format!("unknown model tier '{s}'")))
    }
}

/// Where inference runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum Device {
    #[default]
    Cpu,
    Accelerated,
}

/// A span of recognised speech, in seconds from the start of the clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedUtterance {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,

    /// Per-word timings, when the backend reports them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<TimedWord>,
}

/// One recognised word.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedWord {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    /// Language code the text is in.
    pub language: String,
    pub utterances: Vec<TimedUtterance>,
}

/// Pluggable speech recognition engine.
///
/// Input is mono `f32` samples at 16 kHz. Output utterances should be ordered by start
/// time; [`Transcriber`] re-sorts and trims overlaps either way.
pub trait AsrBackend: Send + Sync {
    fn transcribe(&self, samples: &[f32], language: Option<&str>) -> Result<Transcript>;
}

type Loader = dyn Fn(&Path, Device) -> Result<Arc<dyn AsrBackend>> + Send + Sync;

/// Loaded models and device availability for one or more runs.
pub struct AsrContext {
    models_dir: PathBuf,
    accelerated_available: bool,
    loader: Box<Loader>,
    cache: Mutex<HashMap<(ModelTier, Device), Arc<dyn AsrBackend>>>,
}

impl AsrContext {
    /// Context backed by whisper.cpp, loading `ggml-*.bin` files from `models_dir`.
    ///
    /// Each transcription uses `threads` CPU threads.
    pub fn whisper(models_dir: impl Into<PathBuf>, threads: usize) -> Self {
        Self::with_loader(
            models_dir,
            whisper::ACCELERATION_COMPILED_IN,
            move |path: &Path, device: Device| -> Result<Arc<dyn AsrBackend>> {
                Ok(Arc::new(whisper::WhisperBackend::load(path, device, threads)?))
            },
        )
    }

    /// Context with a custom model loader.
    pub fn with_loader<F>(
        models_dir: impl Into<PathBuf>,
        accelerated_available: bool,
        loader: F,
    ) -> Self
    where
        F: Fn(&Path, Device) -> Result<Arc<dyn AsrBackend>> + Send + Sync + 'static,
    {
        Self {
            models_dir: models_dir.into(),
            accelerated_available,
            loader: Box::new(loader),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn accelerated_available(&self) -> bool {
        self.accelerated_available
    }

    pub fn model_path(&self, tier: ModelTier) -> PathBuf {
        self.models_dir.join(tier.filename())
    }

    /// The backend for `tier` on `device`, loading it on first use.
    ///
    /// Asking for an accelerated device this context can't provide is an error, never a
    /// quiet fall back to CPU.
    pub fn backend(&self, tier: ModelTier, device: Device) -> Result<Arc<dyn AsrBackend>> {
        if device == Device::Accelerated && !self.accelerated_available {
            return Err(Error::DeviceUnavailable(
                "this build has no GPU support compiled in".into(),
            ));
        }

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| Error::msg("ASR model cache lock poisoned"))?;
        if let Some(backend) = cache.get(&(tier, device)) {
            return Ok(Arc::clone(backend));
        }

        let path = self.model_path(tier);
        if !path.is_file() {
            return Err(Error::ModelLoad {
                path,
                reason: "model file not found (fetch it with model-downloader)".into(),
            });
        }

        tracing::info!(model = %tier, ?device, path = %path.display(), "loading ASR model");
        let backend = (self.loader)(&path, device)?;
        cache.insert((tier, device), Arc::clone(&backend));
        Ok(backend)
    }
}

/// Runs speech recognition over clip files.
pub struct Transcriber<'a> {
    media: &'a dyn MediaBackend,
    backend: Option<Arc<dyn AsrBackend>>,
    opts: CaptionOpts,
}

impl<'a> Transcriber<'a> {
    /// Resolve the model once up front. Dry runs never touch `ctx`.
    pub fn new(
        media: &'a dyn MediaBackend,
        ctx: &AsrContext,
        opts: &CaptionOpts,
    ) -> Result<Self> {
        let backend = if opts.dry_run {
            None
        } else {
            Some(ctx.backend(opts.model, opts.device)?)
        };
        Ok(Self {
            media,
            backend,
            opts: opts.clone(),
        })
    }

    pub fn opts(&self) -> &CaptionOpts {
        &self.opts
    }

    /// Transcribe one clip into ordered, non-overlapping utterances.
    pub fn transcribe(&self, clip: &Path, cancel: &CancelToken) -> Result<Transcript> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let Some(backend) = &self.backend else {
            return self.dry_run(clip);
        };

        let wav = tempfile::Builder::new()
            .prefix("clipcap-")
            .suffix(".wav")
            .tempfile()?;
        self.media.extract_audio(clip, wav.path(), cancel)?;

        let (samples, _spec) = wav::get_samples_from_wav(wav.path())
            .map_err(|e| Error::Transcription(format!("{e:#}")))?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut transcript = backend.transcribe(&samples, self.opts.language.as_deref())?;
        if let Some(words) = self.opts.words_per_cue {
            transcript.utterances = split_into_cues(transcript.utterances, words);
        }
        normalize_utterances(&mut transcript.utterances);
        if let Some(lang) = &self.opts.language {
            transcript.language = lang.clone();
        }
        Ok(transcript)
    }

    fn dry_run(&self, clip: &Path) -> Result<Transcript> {
        let duration = self.media.probe(clip)?.duration_seconds;
        Ok(Transcript {
            language: self
                .opts
                .language
                .clone()
                .unwrap_or_else(|| UNDETERMINED_LANGUAGE.to_owned()),
            utterances: vec![TimedUtterance {
                start_seconds: 0.0,
                end_seconds: duration,
                text: DRY_RUN_TEXT.to_owned(),
                words: Vec::new(),
            }],
        })
    }
}

/// Break each utterance into cues of at most `words_per_cue` words.
///
/// A cue runs from its first word's start to its last word's end. Utterances without word
/// timings are kept whole.
pub fn split_into_cues(
    utterances: Vec<TimedUtterance>,
    words_per_cue: usize,
) -> Vec<TimedUtterance> {
    let words_per_cue = words_per_cue.max(1);
    let mut cues = Vec::with_capacity(utterances.len());
    for utterance in utterances {
        if utterance.words.is_empty() {
            cues.push(utterance);
            continue;
        }
        for chunk in utterance.words.chunks(words_per_cue) {
            let (Some(first), Some(last)) = (chunk.first(), chunk.last()) else {
                continue;
            };
            let text = chunk
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            cues.push(TimedUtterance {
                start_seconds: first.start_seconds,
                end_seconds: last.end_seconds,
                text,
                words: chunk.to_vec(),
            });
        }
    }
    cues
}

/// Sort by start time and clip each utterance so it starts no earlier than the previous
/// one ends. Utterances left with no duration are dropped.
pub fn normalize_utterances(utterances: &mut Vec<TimedUtterance>) {
    utterances.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));

    let mut prev_end = 0.0_f64;
    utterances.retain_mut(|u| {
        u.start_seconds = u.start_seconds.max(prev_end);
        if u.end_seconds <= u.start_seconds {
            return false;
        }
        prev_end = u.end_seconds;
        true
    });
}
