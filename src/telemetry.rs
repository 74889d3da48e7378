use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Initialize tracing output.
///
/// With `log_to_file` set, events append to `~/.voicekey/voicekey.log`;
/// otherwise they go to stdout.
///
/// # Errors
/// Returns error if the log file or its directory cannot be created.
pub fn init(log_to_file: bool) -> Result<()> {
    if !log_to_file {
        tracing_subscriber::fmt().with_target(false).init();
        return Ok(());
    }

    let log_path = default_log_path()?;

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(file)
        .with_target(false)
        .with_ansi(false)
        .init();

    tracing::info!("logging to {}", log_path.display());

    Ok(())
}

/// Path of the append-only log file
///
/// # Errors
/// Returns error if HOME is not set.
pub fn default_log_path() -> Result<PathBuf> {
    Ok(crate::config::data_dir()?.join("voicekey.log"))
}

/// Last `max_lines` lines of the log file, oldest first.
///
/// A log that does not exist yet yields an empty list, not an error.
///
/// # Errors
/// Returns error if HOME is not set or the existing log cannot be read.
pub fn recent_logs(max_lines: usize) -> Result<Vec<String>> {
    read_recent_logs(&default_log_path()?, max_lines)
}

fn read_recent_logs(path: &Path, max_lines: usize) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read log file at {}", path.display()))?;
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    Ok(lines[start..].iter().map(|line| (*line).to_owned()).collect())
}
