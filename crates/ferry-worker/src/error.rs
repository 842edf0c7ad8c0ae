//! # Design
//!
//! - Process-level errors raised while bootstrapping the worker.
//! - Messages stay constant; the failing operation travels as a field.

use std::io;

use thiserror::Error;

/// Result alias for worker bootstrap operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Worker bootstrap error type.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Configuration could not be loaded or validated.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: ferry_config::ConfigError,
    },
    /// Logging or metrics setup failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: ferry_telemetry::TelemetryError,
    },
    /// Waiting for the shutdown signal failed.
    #[error("shutdown signal failed")]
    Signal {
        /// Source IO error.
        source: io::Error,
    },
}

impl WorkerError {
    pub(crate) const fn config(operation: &'static str, source: ferry_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: ferry_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }
}
