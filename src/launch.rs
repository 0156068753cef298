use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::info;

use crate::settings::{ScrapeConfig, Settings};

pub const OUTPUT_PREFIX: &str = "[SCRAPER]";
const NO_PROGRESS_ENV: &str = "OTOMOTO_NO_PROGRESS";

/// Persist the query set where `run` reads it, then run the scraper as a child process
/// and relay its output until it exits.
pub async fn launch(config: &ScrapeConfig, settings: &Settings) -> Result<ExitStatus> {
    let path = settings.query_set_path();
    config.save(&path)?;
    info!("Config saved: {}", path.display());

    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let mut cmd = Command::new(exe);
    cmd.arg("run");

    info!("Scraper started");
    let status = stream_child(cmd, Some(&settings.log_file), std::io::stdout()).await?;
    info!("Scraper finished: {}", status);
    Ok(status)
}

/// Spawn `cmd` with stdout piped and progress bars off. Each output line is written to
/// `sink` with the `[SCRAPER]` prefix and, unprefixed, to `log_file`. The child is killed
/// if relaying fails before it exits.
pub async fn stream_child<W: Write>(
    mut cmd: Command,
    log_file: Option<&Path>,
    mut sink: W,
) -> Result<ExitStatus> {
    cmd.stdout(Stdio::piped())
        .env(NO_PROGRESS_ENV, "1")
        .kill_on_drop(true);
    let mut child = cmd.spawn().context("failed to start scraper process")?;
    let stdout = child.stdout.take().context("scraper stdout was not captured")?;

    let mut log = log_file.map(open_log).transpose()?;
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        writeln!(sink, "{} {}", OUTPUT_PREFIX, line)?;
        if let Some(log) = log.as_mut() {
            writeln!(log, "{}", line)?;
        }
    }
    sink.flush()?;

    Ok(child.wait().await?)
}

fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}
