use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use clipcap::cancel::CancelToken;
use clipcap::layout::Layout;
use clipcap::manifest::SegmentManifest;
use clipcap::media::FfmpegBackend;
use clipcap::opts::{CaptionOpts, ExtractOpts, RunOpts, SubtitleMode};
use clipcap::pipeline::{Pipeline, RunResult};
use clipcap::plan::plan;
use clipcap::pool::default_workers;
use clipcap::transcriber::{AsrContext, Device, ModelTier};

/// Exit status when some clips failed but the run completed.
const EXIT_PARTIAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "clipcap")]
#[command(about = "Cut titled clips from a master video and caption them", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Directory holding `raw_assets/` and `final_output/`.
    #[arg(long, env = "CLIPCAP_BASE_DIR", default_value = ".", global = true)]
    base_dir: PathBuf,

    /// Item identifier (subdirectory name under `raw_assets/` and `final_output/`).
    #[arg(long, global = true)]
    id: Option<String>,

    #[arg(long, env = "CLIPCAP_FFMPEG", default_value = "ffmpeg", global = true)]
    ffmpeg: PathBuf,

    #[arg(long, env = "CLIPCAP_FFPROBE", default_value = "ffprobe", global = true)]
    ffprobe: PathBuf,

    /// Concurrent clip jobs (defaults to half the CPUs, at most 4).
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Only process these 1-based clip indices (comma separated), e.g. to retry failures.
    #[arg(long, value_delimiter = ',', global = true)]
    only: Vec<usize>,

    /// Redo outputs that already exist.
    #[arg(long, global = true)]
    overwrite: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the cut jobs for the item's manifest without running anything.
    Plan {
        #[command(flatten)]
        extract: ExtractArgs,
    },

    /// Cut clips only.
    Clip {
        #[command(flatten)]
        extract: ExtractArgs,
    },

    /// Caption clips already in the output directory.
    Caption {
        #[command(flatten)]
        caption: CaptionArgs,
    },

    /// Cut clips and caption them.
    Run {
        #[command(flatten)]
        extract: ExtractArgs,

        #[command(flatten)]
        caption: CaptionArgs,
    },
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Container for produced clips.
    #[arg(long, default_value = "mkv", value_parser = ["mkv", "mp4", "mov"])]
    container: String,

    /// Carry the item's `subtitles.srt` into each clip.
    #[arg(long, value_enum, default_value_t = SubtitleMode::None)]
    subtitles: SubtitleMode,

    /// Source subtitle file (defaults to `raw_assets/<id>/subtitles.srt`).
    #[arg(long)]
    subtitle_file: Option<PathBuf>,

    /// x264 constant rate factor.
    #[arg(long, default_value_t = 18)]
    crf: u8,

    /// x264 preset.
    #[arg(long, default_value = "ultrafast")]
    preset: String,
}

#[derive(Args, Debug)]
struct CaptionArgs {
    #[arg(short = 'm', long, value_enum, default_value_t = ModelTier::Small)]
    model: ModelTier,

    #[arg(long, value_enum, default_value_t = Device::Cpu)]
    device: Device,

    /// Language code hint; auto-detected when omitted.
    #[arg(short = 'l', long)]
    language: Option<String>,

    /// Write `.srt` files but don't mux them into the clips.
    #[arg(long)]
    no_embed: bool,

    /// Skip speech recognition and write placeholder captions.
    #[arg(long)]
    dry_run: bool,

    /// Split captions into short cues of at most this many words.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    words_per_cue: Option<u64>,

    /// Directory holding `ggml-*.bin` models.
    #[arg(long, env = "CLIPCAP_MODELS_DIR", default_value = "./models")]
    models_dir: PathBuf,
}

impl ExtractArgs {
    fn to_opts(&self, overwrite: bool) -> ExtractOpts {
        let mut opts = ExtractOpts {
            container_ext: self.container.clone(),
            subtitles: self.subtitles,
            subtitle_path: self.subtitle_file.clone(),
            overwrite,
            ..ExtractOpts::default()
        };
        opts.encoder.crf = self.crf;
        opts.encoder.preset = self.preset.clone();
        opts
    }
}

impl CaptionArgs {
    fn to_opts(&self, overwrite: bool) -> CaptionOpts {
        CaptionOpts {
            model: self.model,
            device: self.device,
            language: self.language.clone(),
            embed: !self.no_embed,
            overwrite,
            dry_run: self.dry_run,
            words_per_cue: self.words_per_cue.map(|n| n as usize),
        }
    }
}

impl GlobalArgs {
    fn layout(&self) -> Result<Layout> {
        let Some(id) = self.id.as_deref() else {
            bail!("--id is required");
        };
        Ok(Layout::new(&self.base_dir, id))
    }

    fn run_opts(&self) -> RunOpts {
        let only: BTreeSet<usize> = self.only.iter().copied().collect();
        RunOpts {
            workers: self.workers.unwrap_or_else(default_workers).max(1),
            only: (!only.is_empty()).then_some(only),
        }
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    clipcap::logging::init();
    let cli = Cli::parse();

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping");
                cancel.cancel();
            }
        });
    }

    let outcome = tokio::task::spawn_blocking(move || execute(cli, &cancel)).await;

    match outcome {
        Ok(Ok(None)) => ExitCode::SUCCESS,
        Ok(Ok(Some(result))) => {
            if let Err(err) = print_json(&result) {
                eprintln!("error: {err:#}");
                return ExitCode::FAILURE;
            }
            if result.all_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_PARTIAL)
            }
        }
        Ok(Err(err)) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
        Err(join) => {
            eprintln!("error: worker panicked: {join}");
            ExitCode::FAILURE
        }
    }
}

/// Run the chosen command. `None` means the command printed its own output.
fn execute(cli: Cli, cancel: &CancelToken) -> Result<Option<RunResult>> {
    let global = &cli.global;
    let layout = global.layout()?;
    let run = global.run_opts();

    if let Command::Plan { extract } = &cli.command {
        let mut opts = extract.to_opts(global.overwrite);
        if opts.subtitle_path.is_none() {
            opts.subtitle_path = Some(layout.source_subtitle_path());
        }
        let manifest = SegmentManifest::load(layout.manifest_path())?;
        let jobs: Vec<_> = plan(
            &layout.available_sources()?,
            &manifest,
            &layout.final_dir(),
            &opts,
        )?
        .into_iter()
        .filter(|j| run.includes(j.index))
        .collect();
        print_json(&jobs)?;
        return Ok(None);
    }

    let media = FfmpegBackend::new(&global.ffmpeg, &global.ffprobe)
        .detect()
        .context("media backend check failed")?;

    let models_dir = match &cli.command {
        Command::Caption { caption } | Command::Run { caption, .. } => caption.models_dir.clone(),
        _ => PathBuf::from("./models"),
    };
    let threads = (num_cpus::get() / run.workers).max(1);
    let asr = AsrContext::whisper(models_dir, threads);
    let pipeline = Pipeline::new(&media, &asr);

    let result = match &cli.command {
        Command::Clip { extract } => {
            let opts = extract.to_opts(global.overwrite);
            pipeline.run_layout(&layout, &opts, None, &run, cancel)?
        }
        Command::Caption { caption } => {
            let opts = caption.to_opts(global.overwrite);
            let clips = layout.existing_clips()?;
            if clips.is_empty() {
                bail!("no clips found in {}", layout.final_dir().display());
            }
            pipeline.caption_existing(&clips, &opts, &run, cancel)?
        }
        Command::Run { extract, caption } => {
            let extract = extract.to_opts(global.overwrite);
            let caption = caption.to_opts(global.overwrite);
            pipeline.run_layout(&layout, &extract, Some(&caption), &run, cancel)?
        }
        Command::Plan { .. } => return Ok(None),
    };

    Ok(Some(result))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}
