use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::cleaner::OllamaCleaner;
use crate::config::{Config, ConfigError, ConfigPatch, ConfigStore, DEFAULT_LLM_PROMPT};
use crate::deps::{self, DependencyStatus};
use crate::history::{HistoryEntry, HistoryError, HistoryLog};
use crate::models::{ModelDescriptor, ModelDownloader, AVAILABLE_MODELS};
use crate::pipeline::{PipelineHandle, PipelineState};
use crate::recorder::Microphone;

/// Control surface consumed by the settings UI layer.
///
/// A thin facade over the owning components: queries read current state,
/// commands forward to the single writer of each resource. Blocking
/// commands (install, download) should run on a blocking task.
pub struct AppService {
    config: Arc<ConfigStore>,
    history: Arc<HistoryLog>,
    downloader: Arc<ModelDownloader>,
    cleaner: OllamaCleaner,
    pipeline: PipelineHandle,
}

impl AppService {
    /// Wire the service over the running components
    #[must_use]
    pub fn new(
        config: Arc<ConfigStore>,
        history: Arc<HistoryLog>,
        downloader: Arc<ModelDownloader>,
        pipeline: PipelineHandle,
    ) -> Self {
        Self {
            config,
            history,
            downloader,
            cleaner: OllamaCleaner::new(),
            pipeline,
        }
    }

    /// Current complete config record
    #[must_use]
    pub fn config(&self) -> Config {
        self.config.get()
    }

    /// Merge a partial update into the config and persist it.
    ///
    /// A changed hotkey takes effect after the next restart; the listener is
    /// not re-registered live.
    ///
    /// # Errors
    /// Returns error if persisting fails; the previous config stays in effect.
    pub fn save_config(&self, patch: ConfigPatch) -> Result<(), ConfigError> {
        self.config.save(patch)
    }

    /// Current pipeline state
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    /// Subscribe to pipeline state-change events
    #[must_use]
    pub fn subscribe_state(&self) -> broadcast::Receiver<PipelineState> {
        self.pipeline.subscribe()
    }

    /// Probe for the external tools; never cached
    #[must_use]
    pub fn check_dependencies(&self) -> DependencyStatus {
        deps::check()
    }

    /// Install a dependency by name ("sox", "whisper", "nowplaying").
    ///
    /// Blocks until the installer exits; re-probe with
    /// [`Self::check_dependencies`] afterward.
    ///
    /// # Errors
    /// Returns error for an unknown name or a failed install.
    pub fn install_dependency(&self, name: &str) -> Result<()> {
        let dependency = deps::Dependency::from_name(name)
            .ok_or_else(|| anyhow!("unknown dependency: {name}"))?;
        deps::install(dependency)?;
        Ok(())
    }

    /// The static model catalog
    #[must_use]
    pub fn available_models(&self) -> &'static [ModelDescriptor] {
        AVAILABLE_MODELS
    }

    /// Filenames of models present in local storage
    #[must_use]
    pub fn downloaded_models(&self) -> Vec<String> {
        self.downloader.downloaded()
    }

    /// Download a model into storage and point the config at it.
    ///
    /// Single-flight: a concurrent download fails fast with
    /// [`crate::models::DownloadError::Busy`].
    ///
    /// # Errors
    /// Returns error if the download fails or the config update fails.
    pub fn download_model(&self, name: &str, url: &str) -> Result<()> {
        let model_path = self.downloader.download(name, url)?;
        self.config.save(ConfigPatch {
            whisper_model: Some(model_path.to_string_lossy().into_owned()),
            ..ConfigPatch::default()
        })?;
        Ok(())
    }

    /// Whether the local Ollama server is up
    #[must_use]
    pub fn is_ollama_running(&self) -> bool {
        self.cleaner.is_running()
    }

    /// Models available on the Ollama server (empty if unreachable)
    #[must_use]
    pub fn ollama_models(&self) -> Vec<String> {
        self.cleaner.list_models().unwrap_or_default()
    }

    /// Completed runs, oldest first
    ///
    /// # Errors
    /// Returns error if the history log cannot be read.
    pub fn history(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        self.history.list()
    }

    /// The built-in cleanup prompt template
    #[must_use]
    pub fn default_prompt(&self) -> &'static str {
        DEFAULT_LLM_PROMPT
    }

    /// Path of the append-only log file
    ///
    /// # Errors
    /// Returns error if HOME is not set.
    pub fn log_path(&self) -> Result<std::path::PathBuf> {
        crate::telemetry::default_log_path()
    }

    /// Last `max_lines` lines of the log, oldest first (empty if no log yet)
    ///
    /// # Errors
    /// Returns error if the existing log cannot be read.
    pub fn recent_logs(&self, max_lines: usize) -> Result<Vec<String>> {
        crate::telemetry::recent_logs(max_lines)
    }

    /// Available audio input devices, system default first
    #[must_use]
    pub fn microphones(&self) -> Vec<Microphone> {
        crate::recorder::list_microphones()
    }

    /// Manual test trigger: start a recording as if the hotkey were pressed
    pub fn start_recording(&self) {
        self.pipeline.press();
    }

    /// Manual test trigger: stop the recording as if the hotkey were released
    pub fn stop_recording(&self) {
        self.pipeline.release();
    }
}
