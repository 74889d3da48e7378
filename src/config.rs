use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// Built-in cleanup prompt, used whenever `llm_prompt` is empty.
pub const DEFAULT_LLM_PROMPT: &str = "Clean this voice transcript. Output ONLY the cleaned text, nothing else.
Rules: remove filler words (um, uh, like), fix punctuation and casing, keep original wording.
Transcript:
{{transcript}}";

/// Errors from loading or persisting the config file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Filesystem read/write failure
    #[error("config io error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation
        path: PathBuf,
        /// Underlying io error
        source: std::io::Error,
    },

    /// Config file exists but is not valid TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be serialized (should not happen for a valid record)
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// HOME environment variable not set
    #[error("HOME environment variable not set")]
    NoHome,
}

/// Hotkey combination: modifier set plus key tokens (first key is used)
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct HotkeyConfig {
    /// Modifier names: any of "cmd", "ctrl", "alt", "shift"
    pub modifiers: Vec<String>,
    /// Key tokens, e.g. ["r"]
    pub keys: Vec<String>,
}

/// Complete application settings record.
///
/// Always default-filled: deserializing a partial file yields a record with
/// every missing field at its default, never a partial record.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Input device id; empty means system default
    pub microphone: String,
    /// Path to the ggml whisper model file
    pub whisper_model: String,
    /// Drop known silence/noise artifacts when they are the entire transcript
    pub filter_hallucinations: bool,
    /// Run the Ollama cleanup pass over transcripts
    pub use_ollama: bool,
    /// Ollama model name for the cleanup pass
    pub ollama_model: String,
    /// Global hotkey combination
    pub hotkey: HotkeyConfig,
    /// Pause active media playback while recording
    pub pause_media_on_record: bool,
    /// Cleanup prompt template; empty falls back to [`DEFAULT_LLM_PROMPT`]
    pub llm_prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        let model = data_dir()
            .map(|d| d.join("models").join("ggml-small.en.bin"))
            .unwrap_or_else(|_| PathBuf::from("ggml-small.en.bin"));
        Self {
            microphone: String::new(),
            whisper_model: model.to_string_lossy().into_owned(),
            filter_hallucinations: true,
            use_ollama: true,
            ollama_model: "llama3.2:3b".to_owned(),
            hotkey: HotkeyConfig {
                modifiers: vec!["cmd".to_owned(), "shift".to_owned()],
                keys: vec!["r".to_owned()],
            },
            pause_media_on_record: true,
            llm_prompt: String::new(),
        }
    }
}

/// Partial settings update; `None` fields keep their current value
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigPatch {
    /// New input device id
    pub microphone: Option<String>,
    /// New whisper model path
    pub whisper_model: Option<String>,
    /// Toggle hallucination filtering
    pub filter_hallucinations: Option<bool>,
    /// Toggle the Ollama cleanup pass
    pub use_ollama: Option<bool>,
    /// New Ollama model name
    pub ollama_model: Option<String>,
    /// New hotkey combination (takes effect after restart)
    pub hotkey: Option<HotkeyConfig>,
    /// Toggle media pause while recording
    pub pause_media_on_record: Option<bool>,
    /// New cleanup prompt template
    pub llm_prompt: Option<String>,
}

impl Config {
    /// Returns a copy of this config with the patch's set fields applied
    #[must_use]
    pub fn merged(&self, patch: ConfigPatch) -> Self {
        let mut next = self.clone();
        if let Some(v) = patch.microphone {
            next.microphone = v;
        }
        if let Some(v) = patch.whisper_model {
            next.whisper_model = v;
        }
        if let Some(v) = patch.filter_hallucinations {
            next.filter_hallucinations = v;
        }
        if let Some(v) = patch.use_ollama {
            next.use_ollama = v;
        }
        if let Some(v) = patch.ollama_model {
            next.ollama_model = v;
        }
        if let Some(v) = patch.hotkey {
            next.hotkey = v;
        }
        if let Some(v) = patch.pause_media_on_record {
            next.pause_media_on_record = v;
        }
        if let Some(v) = patch.llm_prompt {
            next.llm_prompt = v;
        }
        next
    }

    /// The active cleanup prompt: configured template, or the built-in default
    #[must_use]
    pub fn effective_prompt(&self) -> &str {
        if self.llm_prompt.is_empty() {
            DEFAULT_LLM_PROMPT
        } else {
            &self.llm_prompt
        }
    }
}

/// Durable settings store backed by `~/.voicekey.toml`.
///
/// All writes are serialized through this store; the in-memory record is
/// replaced only after a save has been durably acknowledged.
pub struct ConfigStore {
    path: PathBuf,
    current: Mutex<Config>,
}

impl ConfigStore {
    /// Load the store from the default config path
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        Self::open(config_path()?)
    }

    /// Load the store from an explicit path (missing file yields defaults)
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn open(path: PathBuf) -> Result<Self, ConfigError> {
        let current = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };
        Ok(Self {
            path,
            current: Mutex::new(current),
        })
    }

    /// Returns the last durably saved config (or defaults if never saved)
    #[must_use]
    pub fn get(&self) -> Config {
        self.current.lock().unwrap().clone()
    }

    /// Merge the patch into the current config and persist the whole record.
    ///
    /// The write goes to a temporary file which is renamed into place, so a
    /// crash mid-save leaves either the old or the new complete record.
    ///
    /// # Errors
    /// Returns error on serialization or filesystem failure; the in-memory
    /// config is left unchanged in that case.
    pub fn save(&self, patch: ConfigPatch) -> Result<(), ConfigError> {
        let mut current = self.current.lock().unwrap();
        let merged = current.merged(patch);

        let contents = toml::to_string_pretty(&merged)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let temp_path = self.path.with_extension("toml.tmp");
        fs::write(&temp_path, contents).map_err(|source| ConfigError::Io {
            path: temp_path.clone(),
            source,
        })?;
        fs::rename(&temp_path, &self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::debug!(path = %self.path.display(), "config saved");
        *current = merged;
        Ok(())
    }
}

/// Path of the durable config file (`~/.voicekey.toml`)
///
/// # Errors
/// Returns error if HOME is not set.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(home_dir()?.join(".voicekey.toml"))
}

/// Application data directory (`~/.voicekey`) holding models, cache and history
///
/// # Errors
/// Returns error if HOME is not set.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    Ok(home_dir()?.join(".voicekey"))
}

fn home_dir() -> Result<PathBuf, ConfigError> {
    std::env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| ConfigError::NoHome)
}

/// Expand a leading `~/` in paths to the home directory
///
/// # Errors
/// Returns error if the path needs expansion and HOME is not set.
pub fn expand_path(path: &str) -> Result<PathBuf, ConfigError> {
    if let Some(stripped) = path.strip_prefix("~/") {
        Ok(home_dir()?.join(stripped))
    } else {
        Ok(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir().join(format!(
            "voicekey_config_test_{}.toml",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn test_defaults_are_complete() {
        let config = Config::default();
        assert!(config.filter_hallucinations);
        assert!(config.use_ollama);
        assert!(config.pause_media_on_record);
        assert_eq!(config.ollama_model, "llama3.2:3b");
        assert_eq!(config.hotkey.keys, vec!["r"]);
        assert!(config.microphone.is_empty());
    }

    #[test]
    fn test_partial_file_is_default_filled() {
        let config: Config = toml::from_str("use_ollama = false\n").unwrap();
        assert!(!config.use_ollama);
        // Everything else keeps its default
        assert!(config.filter_hallucinations);
        assert_eq!(config.hotkey.modifiers, vec!["cmd", "shift"]);
    }

    #[test]
    fn test_merge_applies_only_set_fields() {
        let base = Config::default();
        let merged = base.merged(ConfigPatch {
            microphone: Some("USB Mic".to_owned()),
            use_ollama: Some(false),
            ..ConfigPatch::default()
        });
        assert_eq!(merged.microphone, "USB Mic");
        assert!(!merged.use_ollama);
        assert_eq!(merged.whisper_model, base.whisper_model);
        assert_eq!(merged.hotkey, base.hotkey);
    }

    #[test]
    fn test_sequential_saves_merge_left_to_right() {
        let path = temp_config_path();
        let store = ConfigStore::open(path.clone()).unwrap();

        store
            .save(ConfigPatch {
                ollama_model: Some("qwen2.5:3b".to_owned()),
                ..ConfigPatch::default()
            })
            .unwrap();
        store
            .save(ConfigPatch {
                filter_hallucinations: Some(false),
                ..ConfigPatch::default()
            })
            .unwrap();
        store
            .save(ConfigPatch {
                ollama_model: Some("llama3.2:1b".to_owned()),
                ..ConfigPatch::default()
            })
            .unwrap();

        // Equivalent to defaults merged with each patch in order
        let expected = Config::default()
            .merged(ConfigPatch {
                ollama_model: Some("qwen2.5:3b".to_owned()),
                ..ConfigPatch::default()
            })
            .merged(ConfigPatch {
                filter_hallucinations: Some(false),
                ..ConfigPatch::default()
            })
            .merged(ConfigPatch {
                ollama_model: Some("llama3.2:1b".to_owned()),
                ..ConfigPatch::default()
            });
        assert_eq!(store.get(), expected);

        // And the persisted record round-trips as a complete config
        let reloaded = ConfigStore::open(path.clone()).unwrap();
        assert_eq!(reloaded.get(), expected);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let path = temp_config_path();
        let store = ConfigStore::open(path.clone()).unwrap();
        store.save(ConfigPatch::default()).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("toml.tmp").exists());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_effective_prompt_falls_back_to_default() {
        let mut config = Config::default();
        assert_eq!(config.effective_prompt(), DEFAULT_LLM_PROMPT);

        config.llm_prompt = "Fix: {{transcript}}".to_owned();
        assert_eq!(config.effective_prompt(), "Fix: {{transcript}}");
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let home = std::env::var("HOME").unwrap();
        let result = expand_path("~/models/ggml-tiny.bin").unwrap();
        assert_eq!(result, PathBuf::from(home).join("models/ggml-tiny.bin"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let result = expand_path("/tmp/model.bin").unwrap();
        assert_eq!(result, PathBuf::from("/tmp/model.bin"));
    }
}
