use std::path::Path;

use whisper_rs::WhisperContext;

use crate::transcriber::{AsrBackend, Device, Transcript, UNDETERMINED_LANGUAGE};
use crate::{Error, Result};

mod ctx;
mod logging;
mod segments;

pub use logging::init_whisper_logging;

/// Whether this build links a GPU backend into whisper.cpp.
pub const ACCELERATION_COMPILED_IN: bool = cfg!(any(
    feature = "cuda",
    feature = "metal",
    feature = "hipblas",
    feature = "vulkan",
    feature = "coreml"
));

/// Built-in backend powered by `whisper-rs` / `whisper.cpp`.
pub struct WhisperBackend {
    ctx: WhisperContext,
    threads: usize,
}

impl WhisperBackend {
    /// Load a whisper.cpp model from disk.
    pub fn load(model_path: &Path, device: Device, threads: usize) -> Result<Self> {
        let use_gpu = device == Device::Accelerated;
        if use_gpu && !ACCELERATION_COMPILED_IN {
            return Err(Error::DeviceUnavailable(
                "this build has no GPU support compiled in".into(),
            ));
        }

        let ctx = ctx::get_context(model_path, use_gpu).map_err(|e| Error::ModelLoad {
            path: model_path.to_owned(),
            reason: format!("{e:#}"),
        })?;

        Ok(Self {
            ctx,
            threads: threads.max(1),
        })
    }

    /// Access the underlying Whisper context.
    pub fn context(&self) -> &WhisperContext {
        &self.ctx
    }
}

impl AsrBackend for WhisperBackend {
    fn transcribe(&self, samples: &[f32], language: Option<&str>) -> Result<Transcript> {
        if samples.is_empty() {
            return Ok(Transcript {
                language: language.unwrap_or(UNDETERMINED_LANGUAGE).to_owned(),
                utterances: Vec::new(),
            });
        }

        let state = segments::run_whisper_full(&self.ctx, language, self.threads, samples)
            .map_err(|e| Error::Transcription(format!("{e:#}")))?;

        let mut utterances = Vec::new();
        for segment in state.as_iter() {
            let utterance = segments::to_utterance(&segment)
                .map_err(|e| Error::Transcription(format!("{e:#}")))?;
            if !utterance.text.is_empty() {
                utterances.push(utterance);
            }
        }

        let language = match language {
            Some(lang) => lang.to_owned(),
            None => whisper_rs::get_lang_str(state.full_lang_id_from_state())
                .unwrap_or(UNDETERMINED_LANGUAGE)
                .to_owned(),
        };

        Ok(Transcript {
            language,
            utterances,
        })
    }
}
