//! Voicekey - hold a hotkey, speak, get cleaned text.
//!
//! This library exports the pipeline's modules for testing and for the
//! settings UI layer, which consumes [`service::AppService`].

/// Ollama cleanup pass over transcripts
pub mod cleaner;
/// Durable settings store
pub mod config;
/// External tool probing and installation
pub mod deps;
/// Append-only run history
pub mod history;
/// Global hotkey listening and debouncing
pub mod hotkey;
/// Media playback pause/resume
pub mod media;
/// Model catalog and downloads
pub mod models;
/// Pasteboard text delivery
pub mod output;
/// The press-and-hold dictation state machine
pub mod pipeline;
/// sox-based audio recording
pub mod recorder;
/// Control surface for the UI layer
pub mod service;
/// Logging setup
pub mod telemetry;
/// whisper-cli transcription
pub mod transcriber;
