use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::{CAPTION_TRACK_TITLE, MediaBackend, MediaProbe};
use crate::cancel::CancelToken;
use crate::opts::{ExtractOpts, SubtitleMode};
use crate::plan::ClipJob;
use crate::{Error, Result};

/// Lines of stderr kept for failure reports.
const STDERR_TAIL_LINES: usize = 20;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Sample rate the speech model expects.
pub const ASR_SAMPLE_RATE: u32 = 16_000;

/// [`MediaBackend`] that shells out to `ffmpeg` and `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegBackend {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Check both tools answer `-version`, so a missing install fails before any job runs.
    pub fn detect(self) -> Result<Self> {
        for program in [&self.ffmpeg, &self.ffprobe] {
            let out = run(program, [OsString::from("-version")], &CancelToken::new())
                .map_err(|err| match err {
                    Error::BackendUnavailable { .. } => err,
                    other => Error::BackendUnavailable {
                        program: program_name(program),
                        reason: other.to_string(),
                    },
                })?;
            let banner = String::from_utf8_lossy(&out);
            tracing::debug!(
                program = %program.display(),
                version = banner.lines().next().unwrap_or_default(),
                "media backend detected"
            );
        }
        Ok(self)
    }
}

impl MediaBackend for FfmpegBackend {
    fn cut(&self, job: &ClipJob, opts: &ExtractOpts, cancel: &CancelToken) -> Result<()> {
        run(&self.ffmpeg, cut_args(job, opts), cancel).map(|_| ())
    }

    fn extract_audio(&self, media: &Path, wav_out: &Path, cancel: &CancelToken) -> Result<()> {
        run(&self.ffmpeg, audio_args(media, wav_out), cancel).map(|_| ())
    }

    fn probe(&self, media: &Path) -> Result<MediaProbe> {
        if !media.is_file() {
            return Err(Error::SourceNotFound {
                path: media.to_owned(),
            });
        }
        let out = run(&self.ffprobe, probe_args(media), &CancelToken::new())?;
        parse_probe_output(&String::from_utf8_lossy(&out))
    }

    fn mux_subtitle(
        &self,
        clip: &Path,
        srt: &Path,
        output: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        let keep = self.probe(clip)?.foreign_subtitles();
        run(&self.ffmpeg, mux_args(clip, srt, output, &keep), cancel).map(|_| ())
    }
}

/// Subtitle codec a container can carry as a soft track.
pub fn subtitle_codec_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp4" | "mov" | "m4v") => "mov_text",
        Some("webm") => "webvtt",
        _ => "srt",
    }
}

fn common_args() -> Vec<OsString> {
    ["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]
        .into_iter()
        .map(OsString::from)
        .collect()
}

/// Arguments for one cut.
///
/// Burn-in seeks on the output side so the subtitle filter sees source timestamps. Every
/// other cut seeks on the input side; a soft-muxed subtitle input is shifted back by the
/// start offset with `-itsoffset` so its cues line up with the clip.
pub fn cut_args(job: &ClipJob, opts: &ExtractOpts) -> Vec<OsString> {
    let start = job.start_seconds.to_string();
    let duration = job.duration_seconds.to_string();
    let mode = job.subtitles.as_ref().map(|s| s.mode);

    let mut args = common_args();
    let mut filter = String::from("setsar=1");

    match (&job.subtitles, mode) {
        (Some(sub), Some(SubtitleMode::BurnIn)) => {
            args.push("-i".into());
            args.push(job.source_path.clone().into());
            args.push("-ss".into());
            args.push(start.into());
            filter.push_str(",subtitles=");
            filter.push_str(&escape_filter_path(&sub.path));
        }
        (Some(sub), Some(SubtitleMode::SoftMux)) => {
            args.push("-ss".into());
            args.push(start.clone().into());
            args.push("-i".into());
            args.push(job.source_path.clone().into());
            args.push("-itsoffset".into());
            args.push(format!("-{start}").into());
            args.push("-i".into());
            args.push(sub.path.clone().into());
            for map in ["0:v:0?", "0:a?", "1:0"] {
                args.push("-map".into());
                args.push(map.into());
            }
        }
        _ => {
            args.push("-ss".into());
            args.push(start.into());
            args.push("-i".into());
            args.push(job.source_path.clone().into());
        }
    }

    args.push("-t".into());
    args.push(duration.into());
    args.push("-vf".into());
    args.push(filter.into());
    args.push("-c:v".into());
    args.push(opts.encoder.codec.clone().into());
    args.push("-preset".into());
    args.push(opts.encoder.preset.clone().into());
    args.push("-crf".into());
    args.push(opts.encoder.crf.to_string().into());
    args.push("-c:a".into());
    args.push(opts.audio_codec.clone().into());
    if mode == Some(SubtitleMode::SoftMux) {
        args.push("-c:s".into());
        args.push(subtitle_codec_for(&job.output_path).into());
    }
    args.push("-avoid_negative_ts".into());
    args.push("make_zero".into());
    args.push("-max_muxing_queue_size".into());
    args.push("9999".into());
    args.push(job.output_path.clone().into());
    args
}

pub fn audio_args(media: &Path, wav_out: &Path) -> Vec<OsString> {
    let mut args = common_args();
    args.push("-i".into());
    args.push(media.into());
    for a in ["-vn", "-ac", "1", "-ar"] {
        args.push(a.into());
    }
    args.push(ASR_SAMPLE_RATE.to_string().into());
    for a in ["-c:a", "pcm_s16le", "-f", "wav"] {
        args.push(a.into());
    }
    args.push(wav_out.into());
    args
}

pub fn probe_args(media: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(media.into());
    args
}

/// Arguments for adding `srt` to `clip` as a tagged soft track.
///
/// `keep` lists the clip's subtitle streams (per-type indices) to carry over; the new track
/// lands after them.
pub fn mux_args(clip: &Path, srt: &Path, output: &Path, keep: &[usize]) -> Vec<OsString> {
    let mut args = common_args();
    args.push("-i".into());
    args.push(clip.into());
    args.push("-i".into());
    args.push(srt.into());

    let mut maps = vec!["0:v?".to_owned(), "0:a?".to_owned()];
    maps.extend(keep.iter().map(|i| format!("0:s:{i}")));
    maps.push("1:0".to_owned());
    for map in maps {
        args.push("-map".into());
        args.push(map.into());
    }

    let track = keep.len();
    args.push("-c".into());
    args.push("copy".into());
    args.push(format!("-c:s:{track}").into());
    args.push(subtitle_codec_for(output).into());
    for tag in ["title", "handler_name"] {
        args.push(format!("-metadata:s:s:{track}").into());
        args.push(format!("{tag}={CAPTION_TRACK_TITLE}").into());
    }
    args.push(output.into());
    args
}

/// Quote a path for use as a filtergraph option value.
fn escape_filter_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('\'');
    for c in raw.chars() {
        match c {
            '\'' => out.push_str(r"'\''"),
            '\\' => out.push_str(r"\\"),
            ':' => out.push_str(r"\:"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

pub fn parse_probe_output(json: &str) -> Result<MediaProbe> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| Error::msg(format!("failed to parse ffprobe output: {e}")))?;

    let duration_seconds = value
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(Value::as_str)
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let mut probe = MediaProbe {
        duration_seconds,
        ..MediaProbe::default()
    };

    let streams = value.get("streams").and_then(Value::as_array);
    for stream in streams.into_iter().flatten() {
        match stream.get("codec_type").and_then(Value::as_str) {
            Some("video") => probe.video_streams += 1,
            Some("audio") => probe.audio_streams += 1,
            Some("subtitle") => {
                if is_generated_track(stream) {
                    probe.generated_subtitles.push(probe.subtitle_streams);
                }
                probe.subtitle_streams += 1;
            }
            _ => {}
        }
    }

    Ok(probe)
}

/// Tag keys vary by muxer (`title` in Matroska, `handler_name` in mp4, upper-cased by some).
fn is_generated_track(stream: &Value) -> bool {
    let Some(tags) = stream.get("tags").and_then(Value::as_object) else {
        return false;
    };
    tags.iter().any(|(key, value)| {
        matches!(key.to_ascii_lowercase().as_str(), "title" | "handler_name")
            && value.as_str() == Some(CAPTION_TRACK_TITLE)
    })
}

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .unwrap_or(program.as_os_str())
        .to_string_lossy()
        .into_owned()
}

/// Run `program` to completion and return its stdout.
///
/// stderr is drained on a helper thread and only its tail is kept. The child is polled so
/// a tripped `cancel` can kill it instead of leaving it orphaned.
fn run<I>(program: &Path, args: I, cancel: &CancelToken) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = OsString>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let name = program_name(program);
    let args: Vec<OsString> = args.into_iter().collect();
    tracing::trace!(program = %name, ?args, "spawning media backend");

    let mut child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => Error::BackendUnavailable {
                program: name.clone(),
                reason: err.to_string(),
            },
            _ => Error::Io(err),
        })?;

    let stdout = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf);
            buf
        })
    });
    let stderr = child
        .stderr
        .take()
        .map(|err| thread::spawn(move || stderr_tail(err)));

    let started = Instant::now();
    let status = wait_or_kill(&mut child, cancel);

    let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let tail = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
    let status = status?;

    tracing::trace!(
        program = %name,
        %status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "media backend exited"
    );

    if !status.success() {
        return Err(Error::ExtractionBackend {
            program: name,
            status: status.to_string(),
            stderr: tail,
        });
    }
    Ok(stdout)
}

fn wait_or_kill(child: &mut Child, cancel: &CancelToken) -> Result<ExitStatus> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Cancelled);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn stderr_tail<R: Read>(reader: R) -> String {
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line).trim_end().to_owned();
                if text.is_empty() {
                    continue;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(text);
            }
        }
    }

    Vec::from(tail).join("\n")
}
