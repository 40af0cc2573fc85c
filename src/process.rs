//! External tool invocation.

use crate::config::ToolSettings;
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Resolve the binary a tool will run for this whole process.
///
/// An explicit path must exist; otherwise `program` is looked up on `PATH`.
/// A miss is warned about here, once, and the caller treats the tool as
/// unavailable for the rest of the run.
pub fn resolve_binary(tool: &str, settings: &ToolSettings, program: &str) -> Option<PathBuf> {
    match &settings.binary {
        Some(path) if path.is_file() => Some(path.clone()),
        Some(path) => {
            warn!(
                tool,
                path = %path.display(),
                "Configured binary does not exist, skipping tool for this run"
            );
            None
        }
        None => match which::which(program) {
            Ok(path) => {
                debug!(tool, path = %path.display(), "Resolved binary on PATH");
                Some(path)
            }
            Err(e) => {
                warn!(tool, program, "Binary not found on PATH ({}), skipping tool for this run", e);
                None
            }
        },
    }
}

/// Run a binary to completion and return its stdout.
///
/// stdin is closed so a tool that prompts (for a password, say) fails
/// instead of blocking. A non-zero exit status is an error.
pub fn run_tool<I, S>(binary: &Path, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to execute {}", binary.display()))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "{} exited with {}: {}",
            binary.display(),
            output.status,
            stderr.trim()
        );
    }
    Ok(stdout)
}
