use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{info, warn};

/// AppleScript synthesizing a Cmd+V keystroke through System Events
const PASTE_SCRIPT: &str =
    r#"tell application "System Events" to keystroke "v" using command down"#;

/// Output sink delivering the finished text: copied to the system pasteboard
/// via `pbcopy`, then pasted into the frontmost app with a synthesized Cmd+V
#[derive(Debug, Default, Clone, Copy)]
pub struct Pasteboard;

impl Pasteboard {
    /// Copy text to the pasteboard
    ///
    /// # Errors
    /// Returns error if `pbcopy` cannot be spawned or fed.
    pub fn copy(text: &str) -> Result<()> {
        let mut child = Command::new("pbcopy")
            .stdin(Stdio::piped())
            .spawn()
            .context("failed to spawn pbcopy")?;

        child
            .stdin
            .take()
            .context("pbcopy stdin unavailable")?
            .write_all(text.as_bytes())
            .context("failed to write to pbcopy")?;

        let status = child.wait().context("failed to wait for pbcopy")?;
        if !status.success() {
            anyhow::bail!("pbcopy exited with {status}");
        }

        info!(chars = text.len(), "copied to pasteboard");
        Ok(())
    }

    /// Paste the pasteboard contents into the frontmost app via Cmd+V.
    ///
    /// Requires accessibility permission; failures (denied, osascript missing)
    /// are logged and the text stays on the pasteboard for a manual paste.
    pub fn paste() {
        match Command::new("osascript").args(["-e", PASTE_SCRIPT]).status() {
            Ok(status) if status.success() => info!("pasted via keystroke"),
            Ok(status) => warn!(%status, "paste keystroke failed"),
            Err(e) => warn!("failed to run osascript for paste: {e}"),
        }
    }
}

impl crate::pipeline::OutputSink for Pasteboard {
    fn deliver(&self, text: &str) -> Result<()> {
        Self::copy(text)?;
        Self::paste();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paste_script_targets_cmd_v() {
        assert!(PASTE_SCRIPT.contains(r#"keystroke "v""#));
        assert!(PASTE_SCRIPT.contains("command down"));
    }

    #[test]
    fn test_paste_failure_is_inert() {
        // osascript may be missing entirely; the paste step must not panic
        // and must not surface an error
        Pasteboard::paste();
    }
}
