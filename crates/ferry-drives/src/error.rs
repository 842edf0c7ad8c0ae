//! # Design
//!
//! - Constant-message errors with the tool output carried as context.
//! - Timeouts name the bounded operation so logs show which call hung.

use std::io;

use thiserror::Error;

/// Result alias for drive-letter operations.
pub type DriveResult<T> = Result<T, DriveError>;

/// Errors raised while mapping network shares onto drive letters.
#[derive(Debug, Error)]
pub enum DriveError {
    /// A bounded operation exceeded its budget.
    #[error("drive operation timed out")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Budget that was exceeded.
        timeout_ms: u64,
    },
    /// The mount tool could not be started.
    #[error("failed to spawn network drive tool")]
    Spawn {
        /// Operation that attempted the spawn.
        operation: &'static str,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The mount tool exited unsuccessfully.
    #[error("network drive tool failed")]
    Tool {
        /// Operation that failed.
        operation: &'static str,
        /// Combined tool output.
        detail: String,
    },
    /// Shared worker state held a value of the wrong shape.
    #[error("worker storage value is malformed")]
    Decode {
        /// Storage key that was read.
        key: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// A tool-output pattern failed to compile.
    #[error("failed to compile tool output pattern")]
    Pattern {
        /// Underlying regex error.
        source: regex::Error,
    },
}

impl DriveError {
    /// Tool output or error text used when matching known messages.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Tool { detail, .. } => detail.clone(),
            Self::Spawn { source, .. } => source.to_string(),
            Self::Decode { source, .. } => source.to_string(),
            Self::Pattern { source } => source.to_string(),
            Self::Timeout {
                operation,
                timeout_ms,
            } => format!("{operation}: timeout after {timeout_ms}ms"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_prefers_tool_output() {
        let err = DriveError::Tool {
            operation: "mount",
            detail: "System error 67 has occurred.".into(),
        };
        assert_eq!(err.to_string(), "network drive tool failed");
        assert_eq!(err.detail(), "System error 67 has occurred.");

        let timeout = DriveError::Timeout {
            operation: "unmount",
            timeout_ms: 800,
        };
        assert_eq!(timeout.detail(), "unmount: timeout after 800ms");
    }
}
