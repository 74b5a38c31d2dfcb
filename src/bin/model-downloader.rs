// Downloads the Whisper model files clipcap's caption stage loads.

use anyhow::{Context, Result};
use clap::Parser;
use clipcap::transcriber::ModelTier;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "model-downloader")]
#[command(about = "Download Whisper models for clipcap", long_about = None)]
struct Args {
    /// List supported model tiers and exit.
    #[arg(long)]
    list: bool,

    /// Model tier to fetch.
    #[arg(long, value_enum, required_unless_present = "list")]
    tier: Option<ModelTier>,

    /// Target directory to store models (created if missing).
    #[arg(long, env = "CLIPCAP_MODELS_DIR", default_value = "./models")]
    dir: PathBuf,

    /// Download again even if the file is already present.
    #[arg(long)]
    force: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.list {
        print!("{}", model_list_string());
        return Ok(());
    }

    let Some(tier) = args.tier else {
        anyhow::bail!("--tier is required");
    };

    fs::create_dir_all(&args.dir)
        .with_context(|| format!("failed to create target dir: {}", args.dir.display()))?;

    let dest_path = args.dir.join(tier.filename());

    if dest_path.exists() && !args.force {
        println!("already exists: {}", dest_path.display());
        return Ok(());
    }

    let url = tier.url();
    println!("downloading {} ({tier})", tier.filename());
    println!("    {url}");

    let client = Client::builder()
        .user_agent("clipcap-model-downloader")
        .build()
        .context("failed to build HTTP client")?;

    download_to_path(&client, &url, &dest_path)?;

    println!("saved: {}", dest_path.display());
    Ok(())
}

fn model_list_string() -> String {
    let mut out = String::from("Whisper model tiers (fastest first):\n");
    for tier in ModelTier::ALL {
        out.push_str(&format!("  - {:<16}{}\n", tier.name(), tier.filename()));
    }
    out
}

/// Download a URL into `dest_path` via `dest_path.part`, synced and renamed into place.
fn download_to_path(client: &Client, url: &str, dest_path: &Path) -> Result<()> {
    let resp = client
        .get(url)
        .send()
        .with_context(|| format!("request failed: {url}"))?
        .error_for_status()
        .with_context(|| format!("download failed (bad status): {url}"))?;

    let total = resp.content_length();
    download_to_path_with_reader(resp, total, dest_path)
}

fn download_to_path_with_reader<R: Read>(
    mut reader: R,
    total_bytes: Option<u64>,
    dest_path: &Path,
) -> Result<()> {
    let pb = match total_bytes {
        Some(total) if total > 0 => ProgressBar::new(total),
        _ => ProgressBar::new_spinner(),
    };

    let style = ProgressStyle::with_template(
        "{spinner:.green} {bytes}/{total_bytes} {bar:40.cyan/blue} {eta}",
    )
    .context("invalid progress template")?
    .progress_chars("#>-");
    pb.set_style(style);

    let tmp_path = PathBuf::from(format!("{}.part", dest_path.display()));

    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
            pb.inc(n as u64);
        }

        file.sync_all()?;
        pb.finish_and_clear();

        fs::rename(&tmp_path, dest_path)
            .with_context(|| format!("failed to move into place: {}", dest_path.display()))?;

        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
        pb.finish_and_clear();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_list_names_every_tier() {
        let list = model_list_string();
        for tier in ModelTier::ALL {
            assert!(list.contains(tier.name()), "missing {tier}");
        }
        assert!(list.contains("ggml-large-v3-turbo.bin"));
    }

    #[test]
    fn args_parse_requires_tier_unless_list() -> anyhow::Result<()> {
        let err = Args::try_parse_from(["model-downloader"]).unwrap_err();
        assert!(err.to_string().contains("--tier"));

        let args = Args::try_parse_from(["model-downloader", "--list"])?;
        assert!(args.list);
        assert!(args.tier.is_none());

        let args = Args::try_parse_from(["model-downloader", "--tier", "large-v3"])?;
        assert_eq!(args.tier, Some(ModelTier::LargeV3));
        Ok(())
    }

    #[test]
    fn download_to_path_with_reader_writes_and_renames() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dest_path = dir.path().join("ggml-tiny.bin");
        let tmp_path = PathBuf::from(format!("{}.part", dest_path.display()));

        let bytes = b"abc123".to_vec();
        download_to_path_with_reader(
            std::io::Cursor::new(bytes.clone()),
            Some(bytes.len() as u64),
            &dest_path,
        )?;

        assert!(dest_path.exists());
        assert!(!tmp_path.exists());
        assert_eq!(fs::read(&dest_path)?, bytes);
        Ok(())
    }

    struct FailingReader {
        sent: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.sent {
                return Err(std::io::Error::other("connection reset"));
            }
            self.sent = true;
            buf[0] = b'x';
            Ok(1)
        }
    }

    #[test]
    fn failed_download_leaves_no_part_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dest_path = dir.path().join("ggml-tiny.bin");
        let tmp_path = PathBuf::from(format!("{}.part", dest_path.display()));

        let err = download_to_path_with_reader(FailingReader { sent: false }, Some(6), &dest_path)
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(!dest_path.exists());
        assert!(!tmp_path.exists());
        Ok(())
    }
}
