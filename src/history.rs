use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// One completed pipeline run.
///
/// Immutable once appended. `llm_output` empty with `llm_time` 0 means the
/// cleanup pass was skipped; empty output with a non-zero time means it ran
/// and returned nothing. A failed pass records the raw transcript as its
/// output with zero time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Unix seconds, assigned at run start
    pub timestamp: i64,
    /// Raw (filtered) transcription output
    pub whisper_output: String,
    /// Seconds the transcription took
    pub whisper_time: f64,
    /// Cleanup output; empty if the pass was skipped
    pub llm_output: String,
    /// Seconds the cleanup took; 0 if skipped
    pub llm_time: f64,
}

/// Errors from the durable history log; losing history silently is
/// unacceptable, so these surface as hard errors
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Filesystem failure while appending or reading
    #[error("history io error at {path}: {source}")]
    Io {
        /// History file path
        path: PathBuf,
        /// Underlying io error
        source: std::io::Error,
    },

    /// A stored line could not be parsed
    #[error("corrupt history entry: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Append-only record of completed runs, one JSON entry per line.
///
/// All writes are serialized through the log's internal lock.
pub struct HistoryLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HistoryLog {
    /// Open (or lazily create on first append) the log at the given path
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Log at the default location (`~/.voicekey/history.jsonl`)
    ///
    /// # Errors
    /// Returns error if HOME is not set.
    pub fn open_default() -> Result<Self, crate::config::ConfigError> {
        Ok(Self::new(crate::config::data_dir()?.join("history.jsonl")))
    }

    /// Durably append one entry.
    ///
    /// # Errors
    /// Returns error on any filesystem failure. A failed append leaves no
    /// partial state to repair; the entry is simply absent.
    pub fn append(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock().unwrap();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| HistoryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| HistoryError::Io {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{line}").map_err(|source| HistoryError::Io {
            path: self.path.clone(),
            source,
        })?;
        file.sync_all().map_err(|source| HistoryError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ok(())
    }

    /// All entries in insertion order, oldest first.
    ///
    /// Display-order reversal is the consumer's concern, not the log's.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or an entry is corrupt.
    pub fn list(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path).map_err(|source| HistoryError::Io {
            path: self.path.clone(),
            source,
        })?;

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(HistoryError::from))
            .collect()
    }
}
