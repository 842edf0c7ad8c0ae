//! Error types for telemetry operations.

use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while installing logging or maintaining worker metrics.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
    /// A worker metric could not be built or registered.
    #[error("failed to set up worker metric")]
    Metric {
        /// Step that failed (`build` or `register`).
        operation: &'static str,
        /// Metric name tied to the failure.
        name: &'static str,
        /// Underlying Prometheus error.
        #[source]
        source: prometheus::Error,
    },
    /// The registry could not be encoded.
    #[error("failed to render worker metrics")]
    Encode {
        /// Underlying Prometheus error.
        #[source]
        source: prometheus::Error,
    },
    /// The encoded exposition was not valid UTF-8.
    #[error("rendered worker metrics were not utf-8")]
    Utf8 {
        /// Underlying conversion error.
        #[source]
        source: std::string::FromUtf8Error,
    },
}

impl TelemetryError {
    pub(crate) const fn metric(
        operation: &'static str,
        name: &'static str,
        source: prometheus::Error,
    ) -> Self {
        Self::Metric {
            operation,
            name,
            source,
        }
    }
}
