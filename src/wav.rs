use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec};

use crate::media::ffmpeg::ASR_SAMPLE_RATE;

/// Load a WAV file and return normalized mono samples.
pub fn get_samples_from_wav(path: &Path) -> Result<(Vec<f32>, WavSpec)> {
    let file =
        File::open(path).with_context(|| format!("failed to open WAV: {}", path.display()))?;
    get_samples_from_wav_reader(BufReader::new(file))
}

/// Load WAV audio from a reader and return normalized audio samples.
///
/// The audio must be 16-bit PCM, mono, at the speech model's sample rate. Samples come
/// back as `f32` in `[-1.0, 1.0]` along with the `WavSpec`.
pub fn get_samples_from_wav_reader<R>(reader: R) -> Result<(Vec<f32>, WavSpec)>
where
    R: Read + Seek,
{
    let mut reader = WavReader::new(reader).context("failed to read WAV data from reader")?;
    let spec = reader.spec();

    if spec.channels != 1 {
        anyhow::bail!(
            "expected mono WAV (1 channel), got {} channels",
            spec.channels
        );
    }

    if spec.sample_rate != ASR_SAMPLE_RATE {
        anyhow::bail!(
            "expected {} Hz sample rate, got {} Hz",
            ASR_SAMPLE_RATE,
            spec.sample_rate
        );
    }

    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        anyhow::bail!(
            "expected 16-bit PCM, got {} bit {:?}",
            spec.bits_per_sample,
            spec.sample_format
        );
    }

    let mut samples = Vec::with_capacity(reader.len() as usize);
    for sample in reader.samples::<i16>() {
        let pcm = sample?;
        samples.push(pcm as f32 / i16::MAX as f32);
    }

    Ok((samples, spec))
}
