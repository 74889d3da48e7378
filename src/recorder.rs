use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from driving the external recording process
#[derive(Debug, Error)]
pub enum RecordError {
    /// The `rec` binary could not be spawned
    #[error("failed to start rec: {0}")]
    Spawn(std::io::Error),

    /// Stop called with no recording in progress
    #[error("no recording in progress")]
    NotRecording,

    /// Cache directory or clip file could not be prepared
    #[error("recorder io error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation
        path: PathBuf,
        /// Underlying io error
        source: std::io::Error,
    },
}

/// An audio input device
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Microphone {
    /// Device id; empty means system default
    pub id: String,
    /// Human-readable device name
    pub name: String,
}

/// Audio recorder driving an external sox `rec` process.
///
/// `start` spawns `rec` writing 16kHz mono WAV to a fresh clip file;
/// `stop` delivers SIGINT so rec finalizes the WAV header, waiting up to two
/// seconds before force-killing.
pub struct SoxRecorder {
    clip_path: PathBuf,
    child: Option<Child>,
}

impl SoxRecorder {
    /// Create a recorder writing clips under the given cache directory
    #[must_use]
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            clip_path: cache_dir.join("recording.wav"),
            child: None,
        }
    }

    /// Spawn the recording process.
    ///
    /// sox's coreaudio driver only records from the system default input;
    /// AUDIODEV with a device name makes `rec` fail silently, so the device
    /// id is accepted but not forwarded.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be prepared or `rec`
    /// cannot be spawned.
    pub fn start(&mut self, _device_id: &str) -> Result<(), RecordError> {
        if self.child.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.clip_path.parent() {
            fs::create_dir_all(parent).map_err(|source| RecordError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let _ = fs::remove_file(&self.clip_path);

        let binary =
            crate::deps::find_binary("rec").unwrap_or_else(|| PathBuf::from("rec"));
        let clip = self.clip_path.to_string_lossy().into_owned();
        let child = Command::new(binary)
            // 10 minute hard cap so a stuck release can't record forever
            .args(["-q", "-c", "1", "-r", "16000", &clip, "trim", "0", "600"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(RecordError::Spawn)?;

        info!(clip = %self.clip_path.display(), "recording started");
        self.child = Some(child);
        Ok(())
    }

    /// Signal the recorder to finish and flush, returning the clip path.
    ///
    /// Zero-length or sub-second clips are normal output, not errors.
    ///
    /// # Errors
    /// Returns [`RecordError::NotRecording`] if no recording is in progress.
    pub fn stop(&mut self) -> Result<PathBuf, RecordError> {
        let mut child = self.child.take().ok_or(RecordError::NotRecording)?;

        shutdown_child(&mut child, Duration::from_secs(2));

        // Give the filesystem a moment to sync the clip
        std::thread::sleep(Duration::from_millis(50));

        Ok(self.clip_path.clone())
    }
}

/// SIGINT the child, then wait up to `grace` before force-killing.
///
/// SIGINT rather than SIGTERM: rec finalizes the WAV header on SIGINT.
/// The child is always reaped on return; no still-recording process may
/// survive a stop.
fn shutdown_child(child: &mut Child, grace: Duration) {
    let pid = Pid::from_raw(child.id() as i32);
    if let Err(e) = kill(pid, Signal::SIGINT) {
        warn!("failed to signal rec ({pid}): {e}");
    }

    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                info!(%status, "recording stopped");
                break;
            }
            Ok(None) if Instant::now() >= deadline => {
                warn!("rec did not exit after SIGINT, killing");
                let _ = child.kill();
                let _ = child.wait();
                break;
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(50)),
            Err(e) => {
                warn!("failed to wait for rec: {e}");
                let _ = child.kill();
                let _ = child.wait();
                break;
            }
        }
    }
}

impl crate::pipeline::RecorderControl for SoxRecorder {
    fn start(&mut self, device_id: &str) -> Result<(), RecordError> {
        Self::start(self, device_id)
    }

    fn stop(&mut self) -> Result<PathBuf, RecordError> {
        Self::stop(self)
    }
}

/// List available input devices by parsing `system_profiler SPAudioDataType`.
///
/// Always includes the "System Default" entry first; falls back to only that
/// entry if the probe fails.
#[must_use]
pub fn list_microphones() -> Vec<Microphone> {
    let output = Command::new("system_profiler")
        .arg("SPAudioDataType")
        .output();

    match output {
        Ok(out) if out.status.success() => {
            parse_microphones(&String::from_utf8_lossy(&out.stdout))
        }
        _ => vec![system_default()],
    }
}

fn system_default() -> Microphone {
    Microphone {
        id: String::new(),
        name: "System Default".to_owned(),
    }
}

/// Parse system_profiler audio output into input-capable devices.
///
/// Device names are lines at exactly 8 spaces of indent ending with ":";
/// deeper-indented lines are properties. A device counts as an input if it
/// reports input channels or an input source.
fn parse_microphones(output: &str) -> Vec<Microphone> {
    let mut mics = vec![system_default()];
    let mut current: Option<String> = None;
    let mut has_input = false;

    let flush = |current: &mut Option<String>, has_input: &mut bool, mics: &mut Vec<Microphone>| {
        if *has_input {
            if let Some(name) = current.take() {
                if !mics.iter().any(|m| m.name == name) {
                    mics.push(Microphone {
                        id: name.clone(),
                        name,
                    });
                }
            }
        }
        *current = None;
        *has_input = false;
    };

    for line in output.lines() {
        let trimmed = line.trim();
        let is_device_header = line.starts_with("        ")
            && !line.starts_with("          ")
            && trimmed.ends_with(':')
            && !trimmed.contains("Devices:");

        if is_device_header {
            flush(&mut current, &mut has_input, &mut mics);
            current = Some(trimmed.trim_end_matches(':').to_owned());
        } else if trimmed.starts_with("Input Channels:") || trimmed.starts_with("Input Source:") {
            has_input = true;
        }
    }
    flush(&mut current, &mut has_input, &mut mics);

    mics
}
