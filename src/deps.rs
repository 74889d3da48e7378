use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;
use tracing::{error, info};

/// Homebrew prefixes probed before PATH, since bundled apps don't inherit
/// the shell PATH.
const HOMEBREW_BIN_DIRS: [&str; 2] = ["/opt/homebrew/bin", "/usr/local/bin"];

/// External tools the pipeline shells out to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// sox, providing the `rec` recording binary
    Sox,
    /// whisper-cpp, providing the `whisper-cli` transcription binary
    Whisper,
    /// nowplaying-cli, for pausing/resuming media playback
    NowPlaying,
}

impl Dependency {
    /// Parse a dependency name as used by the control surface
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sox" => Some(Self::Sox),
            "whisper" => Some(Self::Whisper),
            "nowplaying" => Some(Self::NowPlaying),
            _ => None,
        }
    }

    /// Binary probed for presence
    #[must_use]
    pub const fn binary(self) -> &'static str {
        match self {
            Self::Sox => "rec",
            Self::Whisper => "whisper-cli",
            Self::NowPlaying => "nowplaying-cli",
        }
    }

    /// Homebrew formula installed for this dependency
    #[must_use]
    pub const fn formula(self) -> &'static str {
        match self {
            Self::Sox => "sox",
            Self::Whisper => "whisper-cpp",
            Self::NowPlaying => "nowplaying-cli",
        }
    }
}

/// Point-in-time probe result; never cached, re-probe after installs
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct DependencyStatus {
    /// `rec` (sox) is available
    pub sox: bool,
    /// `whisper-cli` is available
    pub whisper: bool,
    /// `nowplaying-cli` is available
    pub now_playing: bool,
}

/// Errors from installing a dependency
#[derive(Debug, Error)]
pub enum InstallError {
    /// The package manager could not be started
    #[error("failed to run brew for {dependency:?}: {source}")]
    Spawn {
        /// Dependency being installed
        dependency: Dependency,
        /// Underlying io error
        source: std::io::Error,
    },

    /// The package manager ran but exited non-zero
    #[error("brew install {} exited with {status}", .dependency.formula())]
    InstallFailed {
        /// Dependency being installed
        dependency: Dependency,
        /// Installer exit status
        status: ExitStatus,
    },
}

/// Probe for all external tools. Pure check, no side effects.
#[must_use]
pub fn check() -> DependencyStatus {
    DependencyStatus {
        sox: find_binary(Dependency::Sox.binary()).is_some(),
        whisper: find_binary(Dependency::Whisper.binary()).is_some(),
        now_playing: find_binary(Dependency::NowPlaying.binary()).is_some(),
    }
}

/// Locate a binary: fixed Homebrew prefixes first, then the PATH
#[must_use]
pub fn find_binary(name: &str) -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = HOMEBREW_BIN_DIRS.iter().map(PathBuf::from).collect();
    if let Ok(path_var) = std::env::var("PATH") {
        dirs.extend(std::env::split_paths(&path_var));
    }
    find_in_dirs(name, &dirs)
}

fn find_in_dirs(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn brew_binary() -> PathBuf {
    for dir in HOMEBREW_BIN_DIRS {
        let candidate = Path::new(dir).join("brew");
        if candidate.is_file() {
            return candidate;
        }
    }
    PathBuf::from("brew")
}

/// Install a dependency via Homebrew, blocking until the installer exits.
///
/// Callers must re-run [`check`] afterward rather than assume success.
///
/// # Errors
/// Returns [`InstallError::InstallFailed`] with the exit status on a non-zero
/// exit, or [`InstallError::Spawn`] if brew could not be started.
pub fn install(dependency: Dependency) -> Result<(), InstallError> {
    let formula = dependency.formula();
    info!(formula, "installing dependency via brew");

    let status = Command::new(brew_binary())
        .args(["install", formula])
        .status()
        .map_err(|source| InstallError::Spawn { dependency, source })?;

    if !status.success() {
        error!(formula, %status, "brew install failed");
        return Err(InstallError::InstallFailed { dependency, status });
    }

    info!(formula, "dependency installed");
    Ok(())
}
