//! Media probing through an external `ffprobe`-compatible tool.
//!
//! # Design
//! - The child is spawned with `kill_on_drop`, so timing out or cancelling the
//!   probe future terminates the subprocess.
//! - Output is accepted only when it describes at least one stream.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use ferry_config::ProbeConfig;
use ferry_core::Reason;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result alias for probe runs.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors raised while probing a media file.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The tool could not be started.
    #[error("failed to spawn media probe")]
    Spawn {
        /// Executable that was run.
        program: String,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// The tool exited unsuccessfully.
    #[error("media probe failed")]
    Exit {
        /// Executable that was run.
        program: String,
        /// Exit status as reported by the OS.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
    /// The tool exceeded its time budget.
    #[error("media probe timed out")]
    Timeout {
        /// Budget that was exceeded.
        timeout_ms: u64,
    },
    /// The caller cancelled the probe.
    #[error("media probe cancelled")]
    Cancelled,
    /// Standard output was not JSON.
    #[error("media probe output is not json")]
    Decode {
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// The output described no streams.
    #[error("file is not a media file")]
    NotMedia,
}

impl ProbeError {
    /// User phrase plus technical detail.
    #[must_use]
    pub fn reason(&self) -> Reason {
        let user = match self {
            Self::NotMedia => "File doesn't seem to be a media file",
            Self::Cancelled => "Scan was cancelled",
            Self::Timeout { .. } => "Scan timed out",
            Self::Spawn { .. } | Self::Exit { .. } | Self::Decode { .. } => "Not able to scan file",
        };
        let tech = match self {
            Self::Spawn { program, source } => format!("{self} ({program}): {source}"),
            Self::Exit {
                program,
                status,
                stderr,
            } => format!("{self} ({program}, {status}): {stderr}"),
            Self::Timeout { timeout_ms } => format!("{self} after {timeout_ms}ms"),
            Self::Decode { source } => format!("{self}: {source}"),
            Self::Cancelled | Self::NotMedia => self.to_string(),
        };
        Reason::new(user, tech)
    }
}

/// Configured media probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaProbe {
    executable: String,
    timeout: Duration,
}

impl MediaProbe {
    /// Probe running `executable` with a `timeout` budget.
    pub fn new(executable: impl Into<String>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            timeout,
        }
    }

    /// Probe configured by the worker settings.
    #[must_use]
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(&config.executable, Duration::from_millis(config.timeout_ms))
    }

    /// Scan `path`, returning the tool's stream and format description.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Cancelled`] when `cancel` fires first, and the
    /// other variants when the tool fails or its output is unusable.
    pub async fn probe(&self, path: &Path, cancel: &CancellationToken) -> ProbeResult<Value> {
        debug!(program = %self.executable, path = %path.display(), "probing media file");
        let child = Command::new(&self.executable)
            .arg("-hide_banner")
            .arg("-i")
            .arg(path)
            .args(["-show_streams", "-show_format", "-print_format", "json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProbeError::Spawn {
                program: self.executable.clone(),
                source,
            })?;

        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProbeError::Cancelled),
            finished = tokio::time::timeout(self.timeout, child.wait_with_output()) => match finished {
                Err(_) => {
                    return Err(ProbeError::Timeout {
                        timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                Ok(result) => result.map_err(|source| ProbeError::Spawn {
                    program: self.executable.clone(),
                    source,
                })?,
            },
        };

        if !output.status.success() {
            return Err(ProbeError::Exit {
                program: self.executable.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_probe_output(&output.stdout)
    }
}

/// Decode tool output, rejecting descriptions without streams.
///
/// # Errors
///
/// Returns [`ProbeError::Decode`] for non-JSON output and
/// [`ProbeError::NotMedia`] when no stream is listed.
pub fn parse_probe_output(stdout: &[u8]) -> ProbeResult<Value> {
    let value: Value = serde_json::from_slice(stdout).map_err(|source| ProbeError::Decode { source })?;
    let has_streams = value
        .get("streams")
        .and_then(Value::as_array)
        .is_some_and(|streams| !streams.is_empty());
    if has_streams {
        Ok(value)
    } else {
        Err(ProbeError::NotMedia)
    }
}
