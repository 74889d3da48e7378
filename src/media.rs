use std::path::PathBuf;
use std::process::Command;
use tracing::warn;

/// Media playback control via the optional `nowplaying-cli` tool.
///
/// Every operation degrades to a no-op when the tool is missing or fails;
/// media control must never be fatal to recording.
pub struct NowPlaying {
    binary: Option<PathBuf>,
}

impl Default for NowPlaying {
    fn default() -> Self {
        Self::new()
    }
}

impl NowPlaying {
    /// Locate `nowplaying-cli` if installed
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: crate::deps::find_binary("nowplaying-cli"),
        }
    }

    /// Whether the tool is installed at all
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    /// Whether media is currently playing (playbackRate == 1)
    #[must_use]
    pub fn is_playing(&self) -> bool {
        let Some(binary) = &self.binary else {
            return false;
        };
        Command::new(binary)
            .args(["get", "playbackRate"])
            .output()
            .is_ok_and(|out| String::from_utf8_lossy(&out.stdout).trim() == "1")
    }

    /// Pause active playback; failures are logged, not surfaced
    pub fn pause(&self) {
        self.run("pause");
    }

    /// Resume playback; failures are logged, not surfaced
    pub fn resume(&self) {
        self.run("play");
    }

    fn run(&self, action: &str) {
        let Some(binary) = &self.binary else {
            return;
        };
        if let Err(e) = Command::new(binary).arg(action).status() {
            warn!("nowplaying-cli {action} failed: {e}");
        }
    }
}

impl crate::pipeline::MediaControl for NowPlaying {
    fn is_playing(&self) -> bool {
        Self::is_playing(self)
    }

    fn pause(&self) {
        Self::pause(self);
    }

    fn resume(&self) {
        Self::resume(self);
    }
}
