use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Whole-output artifacts whisper emits on silence/noise input
const HALLUCINATIONS: &[&str] = &["you"];

/// A completed transcription with the wall-clock time it took
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    /// Transcribed text, trimmed; may be empty
    pub text: String,
    /// Seconds the transcription binary ran
    pub seconds: f64,
}

/// Errors from invoking the transcription binary
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// The configured model file does not exist
    #[error("whisper model not found at {0}")]
    ModelMissing(PathBuf),

    /// The binary could not be spawned
    #[error("failed to run whisper-cli: {0}")]
    Spawn(std::io::Error),

    /// The binary exited non-zero
    #[error("whisper-cli exited with {status}: {stderr}")]
    BinaryFailed {
        /// Exit status of the binary
        status: std::process::ExitStatus,
        /// Captured stderr, trimmed
        stderr: String,
    },

    /// The binary's text output could not be read
    #[error("failed to read transcript at {path}: {source}")]
    Output {
        /// Expected transcript path
        path: PathBuf,
        /// Underlying io error
        source: std::io::Error,
    },
}

/// Transcription engine shelling out to `whisper-cli`
pub struct WhisperTranscriber {
    binary: PathBuf,
}

impl Default for WhisperTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl WhisperTranscriber {
    /// Create an engine, resolving the `whisper-cli` binary location
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: crate::deps::find_binary("whisper-cli")
                .unwrap_or_else(|| PathBuf::from("whisper-cli")),
        }
    }

    /// Transcribe an audio clip synchronously with the given model.
    ///
    /// Runs `whisper-cli` with timestamps disabled and writes a `.txt`
    /// sibling of the clip, which is read back and trimmed. With `filter` set,
    /// known silence artifacts that constitute the entire output are dropped.
    ///
    /// # Errors
    /// Returns a [`TranscriptionError`]; callers are expected to degrade to an
    /// empty transcript rather than abort the run.
    pub fn transcribe(
        &self,
        clip: &Path,
        model_path: &Path,
        filter: bool,
    ) -> Result<Transcription, TranscriptionError> {
        if !model_path.exists() {
            return Err(TranscriptionError::ModelMissing(model_path.to_path_buf()));
        }

        let output_base = clip.with_extension("");

        let start = Instant::now();
        let output = Command::new(&self.binary)
            .arg("-m")
            .arg(model_path)
            .arg("-f")
            .arg(clip)
            .arg("--no-timestamps")
            .args(["--language", "en"])
            .arg("--output-txt")
            .arg("--output-file")
            .arg(&output_base)
            .arg("--no-fallback")
            .args(["-et", "2.4"])
            .args(["-lpt", "-1.0"])
            .output()
            .map_err(TranscriptionError::Spawn)?;
        let seconds = start.elapsed().as_secs_f64();

        if !output.status.success() {
            return Err(TranscriptionError::BinaryFailed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let txt_path = output_base.with_extension("txt");
        let raw = fs::read_to_string(&txt_path).map_err(|source| TranscriptionError::Output {
            path: txt_path,
            source,
        })?;

        let text = finalize_transcript(&raw, filter);
        if text.is_empty() {
            warn!("no audio detected (empty transcription)");
        }

        info!(seconds, text_len = text.len(), "transcription completed");
        Ok(Transcription { text, seconds })
    }
}

impl crate::pipeline::TranscribeStage for WhisperTranscriber {
    fn transcribe(
        &self,
        clip: &Path,
        model_path: &Path,
        filter: bool,
    ) -> Result<Transcription, TranscriptionError> {
        Self::transcribe(self, clip, model_path, filter)
    }
}

/// Trim the raw binary output and, with `filter` set, drop it when it is
/// nothing but a known silence artifact. With `filter` unset the output is
/// kept as-is, denylist word or not.
fn finalize_transcript(raw: &str, filter: bool) -> String {
    let text = raw.trim();
    if filter && is_hallucination(text) {
        info!("filtered hallucination on silence/noise");
        return String::new();
    }
    text.to_owned()
}

/// True when the entire output is a known silence/noise artifact.
///
/// Matching is case-insensitive and ignores trailing punctuation; partial
/// matches inside real speech are never filtered.
#[must_use]
pub fn is_hallucination(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(['.', ',', '!', '?'])
        .to_lowercase();
    HALLUCINATIONS.contains(&normalized.as_str())
}
