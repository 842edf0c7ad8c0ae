//! Error types for configuration loading and validation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("failed to read configuration file")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// File that could not be read.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// The configuration file was not valid JSON for the model.
    #[error("failed to parse configuration file")]
    Parse {
        /// File that could not be parsed.
        path: PathBuf,
        /// Source JSON error.
        source: serde_json::Error,
    },
    /// An environment override could not be applied.
    #[error("invalid environment override")]
    InvalidOverride {
        /// Environment variable name.
        key: &'static str,
        /// Offending value.
        value: String,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str, value: impl ToString) -> Self {
        Self::InvalidField {
            field,
            reason,
            value: Some(value.to_string()),
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
