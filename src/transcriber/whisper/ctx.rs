use std::path::Path;

use anyhow::{Context, Result};
use whisper_rs::{WhisperContext, WhisperContextParameters};

use super::logging::init_whisper_logging;

/// Load a ggml model into a `WhisperContext`, on the GPU when `use_gpu` is set.
pub(super) fn get_context(model_path: &Path, use_gpu: bool) -> Result<WhisperContext> {
    init_whisper_logging();

    let path = model_path
        .to_str()
        .with_context(|| format!("model path is not valid UTF-8: {}", model_path.display()))?;

    let ctx_params = WhisperContextParameters {
        use_gpu,
        flash_attn: use_gpu,
        ..Default::default()
    };
    let ctx = WhisperContext::new_with_params(path, ctx_params)
        .with_context(|| format!("failed to load model from path: {path}"))?;

    Ok(ctx)
}
