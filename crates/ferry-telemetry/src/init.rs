//! Logging initialisation and configuration.
//!
//! # Design
//! - Centralises logging setup (pretty or JSON) behind a single entry point.
//! - `RUST_LOG` wins over the configured level when set.
//! - Records the build SHA once so every module reports the same value.

use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Result, TelemetryError};

/// Default logging directive when neither `RUST_LOG` nor configuration sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

static BUILD_SHA: OnceCell<String> = OnceCell::new();

/// Configure and install the global tracing subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError::SubscriberInstall`] if a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig<'_>) -> Result<()> {
    let _ = BUILD_SHA.set(config.build_sha.to_string());

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(build_env_filter(config.level))
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_ids(false),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(build_env_filter(config.level))
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .try_init(),
    };
    installed.map_err(|source| TelemetryError::SubscriberInstall { source })
}

/// Build SHA recorded during logging initialisation.
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD_SHA.get().map_or("dev", String::as_str)
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Level or `EnvFilter` directive (e.g. `info`, `ferry_drives=debug`).
    pub level: &'a str,
    /// Output format selection for the subscriber.
    pub format: LogFormat,
    /// Build identifier recorded for diagnostics.
    pub build_sha: &'a str,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
            build_sha: build_sha(),
        }
    }
}

/// Available output formats for the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Emit logs as structured JSON objects.
    Json,
    /// Emit human-readable logs.
    Pretty,
}

impl LogFormat {
    /// Choose a sensible default for the current build.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }

    /// Parse a format name, falling back to [`LogFormat::infer`] when unset.
    #[must_use]
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Self::Json,
            Some("pretty") => Self::Pretty,
            _ => Self::infer(),
        }
    }
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_map_to_variants() {
        assert_eq!(LogFormat::from_name(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::from_name(Some("pretty")), LogFormat::Pretty);
        assert_eq!(LogFormat::from_name(Some("xml")), LogFormat::infer());
        assert_eq!(LogFormat::from_name(None), LogFormat::infer());
    }

    #[test]
    fn second_install_reports_error() {
        let config = LoggingConfig {
            level: "debug",
            format: LogFormat::Pretty,
            build_sha: "abc123",
        };
        let _ = init_logging(&config);
        let again = init_logging(&config);
        assert!(matches!(again, Err(TelemetryError::SubscriberInstall { .. })));
        assert_eq!(build_sha(), "abc123");
    }
}
