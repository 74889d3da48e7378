use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, warn};

/// Catalog entry for a downloadable whisper model
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ModelDescriptor {
    /// Model name, e.g. "small.en"
    pub name: &'static str,
    /// Approximate download size
    pub size: &'static str,
    /// Relative inference speed
    pub speed: &'static str,
    /// Relative transcription quality
    pub quality: &'static str,
    /// Download URL
    pub url: &'static str,
}

/// Static model catalog; no network call involved
pub const AVAILABLE_MODELS: &[ModelDescriptor] = &[
    ModelDescriptor {
        name: "tiny.en",
        size: "75MB",
        speed: "Fastest",
        quality: "Basic",
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-tiny.en.bin",
    },
    ModelDescriptor {
        name: "base.en",
        size: "142MB",
        speed: "Fast",
        quality: "Good",
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.en.bin",
    },
    ModelDescriptor {
        name: "small.en",
        size: "466MB",
        speed: "Medium",
        quality: "Better",
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-small.en.bin",
    },
    ModelDescriptor {
        name: "medium.en",
        size: "1.5GB",
        speed: "Slow",
        quality: "Great",
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-medium.en.bin",
    },
    ModelDescriptor {
        name: "large",
        size: "3GB",
        speed: "Slowest",
        quality: "Best",
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-large.bin",
    },
];

/// Errors from downloading a model
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Another download is already in flight; retry once it completes
    #[error("another model download is already in progress")]
    Busy,

    /// HTTP request failed
    #[error("model download request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server responded with a non-success status
    #[error("model download failed with status {0}")]
    Status(reqwest::StatusCode),

    /// Local filesystem failure; no partial file is left behind
    #[error("model storage io error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation
        path: PathBuf,
        /// Underlying io error
        source: std::io::Error,
    },
}

/// Canonical on-disk filename for a model name
#[must_use]
pub fn model_filename(model_name: &str) -> String {
    format!("ggml-{model_name}.bin")
}

/// Model storage directory (`~/.voicekey/models`)
///
/// # Errors
/// Returns error if HOME is not set.
pub fn models_dir() -> Result<PathBuf, crate::config::ConfigError> {
    Ok(crate::config::data_dir()?.join("models"))
}

/// Filenames of downloaded models: `.bin` files present in the storage dir.
///
/// Downloaded-state is exactly "file with the expected name exists"; nothing
/// is tracked separately.
#[must_use]
pub fn downloaded_models_in(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "bin") {
                path.file_name().map(|n| n.to_string_lossy().into_owned())
            } else {
                None
            }
        })
        .collect();
    names.sort();
    names
}

/// Single-flight model downloader.
///
/// At most one download is in flight process-wide; a concurrent call fails
/// fast with [`DownloadError::Busy`] instead of queuing.
pub struct ModelDownloader {
    dir: PathBuf,
    in_flight: AtomicBool,
}

/// Releases the in-flight flag when a download finishes or fails
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ModelDownloader {
    /// Create a downloader storing models under `dir`
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Models present in this downloader's storage directory
    #[must_use]
    pub fn downloaded(&self) -> Vec<String> {
        downloaded_models_in(&self.dir)
    }

    fn try_begin(&self) -> Result<FlightGuard<'_>, DownloadError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DownloadError::Busy)?;
        Ok(FlightGuard(&self.in_flight))
    }

    /// Fetch a model into storage under its canonical filename.
    ///
    /// The body streams to a `.tmp` sibling which is renamed into place only
    /// on full success, so a crash or network failure never leaves a file
    /// that [`downloaded_models_in`] reports as present.
    ///
    /// # Errors
    /// Returns [`DownloadError::Busy`] if another download is in flight, or a
    /// download/io error otherwise.
    pub fn download(&self, model_name: &str, url: &str) -> Result<PathBuf, DownloadError> {
        let _guard = self.try_begin()?;

        let model_path = self.dir.join(model_filename(model_name));
        let temp_path = model_path.with_extension("bin.tmp");

        fs::create_dir_all(&self.dir).map_err(|source| DownloadError::Io {
            path: self.dir.clone(),
            source,
        })?;

        info!(model = model_name, url, "downloading model");

        let result = Self::fetch_to(url, &temp_path, &model_path);
        if result.is_err() {
            // No partial artifact may survive a failed download
            if let Err(e) = fs::remove_file(&temp_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove partial download {}: {}", temp_path.display(), e);
                }
            }
        }
        result?;

        info!(path = %model_path.display(), "model downloaded");
        Ok(model_path)
    }

    fn fetch_to(url: &str, temp_path: &Path, model_path: &Path) -> Result<(), DownloadError> {
        let mut response = reqwest::blocking::get(url)?;
        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status()));
        }

        let mut file = fs::File::create(temp_path).map_err(|source| DownloadError::Io {
            path: temp_path.to_path_buf(),
            source,
        })?;

        response.copy_to(&mut file)?;
        drop(file);

        fs::rename(temp_path, model_path).map_err(|source| DownloadError::Io {
            path: model_path.to_path_buf(),
            source,
        })
    }
}
