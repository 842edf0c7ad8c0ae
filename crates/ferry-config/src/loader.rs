//! Load worker configuration from an optional JSON file plus environment overrides.
//!
//! # Design
//! - The environment is injected as a lookup function so loading is testable
//!   without touching process state.
//! - Overrides are applied after the file and before validation.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::model::{LogFormatSetting, WorkerConfig};
use crate::validate::validate;

/// Overrides `workerId`.
pub const ENV_WORKER_ID: &str = "FERRY_WORKER_ID";
/// Overrides `location.localComputerId`.
pub const ENV_COMPUTER_ID: &str = "FERRY_COMPUTER_ID";
/// Overrides `location.localNetworkIds` (comma separated).
pub const ENV_NETWORK_IDS: &str = "FERRY_NETWORK_IDS";
/// Overrides `windowsDriveLetters` (`;` or `,` separated).
pub const ENV_DRIVE_LETTERS: &str = "FERRY_DRIVE_LETTERS";
/// Overrides `driveMapping.enabled`.
pub const ENV_DRIVE_MAPPING: &str = "FERRY_DRIVE_MAPPING";
/// Overrides `probe.executable`.
pub const ENV_FFPROBE: &str = "FERRY_FFPROBE";
/// Overrides `logging.level`.
pub const ENV_LOG_LEVEL: &str = "FERRY_LOG_LEVEL";
/// Overrides `logging.format`.
pub const ENV_LOG_FORMAT: &str = "FERRY_LOG_FORMAT";

/// Load configuration, reading `path` when given and applying overrides from `env`.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, an override is
/// malformed, or the resulting configuration fails validation.
pub fn load_config<E>(path: Option<&Path>, env: E) -> ConfigResult<WorkerConfig>
where
    E: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => WorkerConfig::default(),
    };
    apply_env_overrides(&mut config, &env)?;
    let config = validate(config)?;
    info!(
        worker_id = %config.worker_id,
        computer_id = %config.location.local_computer_id,
        drive_mapping = config.drive_mapping.enabled,
        "worker configuration loaded"
    );
    Ok(config)
}

/// Load configuration using the process environment.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_from_process_env(path: Option<&Path>) -> ConfigResult<WorkerConfig> {
    load_config(path, |key| std::env::var(key).ok())
}

fn read_file(path: &Path) -> ConfigResult<WorkerConfig> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        operation: "read_config",
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "parsing worker configuration file");
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `FERRY_*` overrides to `config`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidOverride`] for malformed values.
pub fn apply_env_overrides<E>(config: &mut WorkerConfig, env: &E) -> ConfigResult<()>
where
    E: Fn(&str) -> Option<String>,
{
    if let Some(value) = env(ENV_WORKER_ID) {
        config.worker_id = value;
    }
    if let Some(value) = env(ENV_COMPUTER_ID) {
        config.location.local_computer_id = value;
    }
    if let Some(value) = env(ENV_NETWORK_IDS) {
        config.location.local_network_ids = split_list(&value, &[',']);
    }
    if let Some(value) = env(ENV_DRIVE_LETTERS) {
        config.windows_drive_letters = parse_drive_letters(&value)?;
    }
    if let Some(value) = env(ENV_DRIVE_MAPPING) {
        config.drive_mapping.enabled = parse_bool(ENV_DRIVE_MAPPING, &value)?;
    }
    if let Some(value) = env(ENV_FFPROBE) {
        config.probe.executable = value;
    }
    if let Some(value) = env(ENV_LOG_LEVEL) {
        config.logging.level = value;
    }
    if let Some(value) = env(ENV_LOG_FORMAT) {
        config.logging.format = Some(match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => LogFormatSetting::Pretty,
            "json" => LogFormatSetting::Json,
            _ => {
                return Err(ConfigError::InvalidOverride {
                    key: ENV_LOG_FORMAT,
                    value,
                    reason: "expected pretty or json",
                });
            }
        });
    }
    Ok(())
}

fn split_list(value: &str, separators: &[char]) -> Vec<String> {
    value
        .split(separators)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_drive_letters(value: &str) -> ConfigResult<Vec<char>> {
    split_list(value, &[';', ','])
        .into_iter()
        .map(|part| {
            let mut chars = part.chars();
            match (chars.next(), chars.next()) {
                (Some(letter), None) => Ok(letter),
                _ => Err(ConfigError::InvalidOverride {
                    key: ENV_DRIVE_LETTERS,
                    value: value.to_string(),
                    reason: "each entry must be a single letter",
                }),
            }
        })
        .collect()
}

fn parse_bool(key: &'static str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidOverride {
            key,
            value: value.to_string(),
            reason: "expected a boolean",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn overrides_replace_defaults() -> anyhow::Result<()> {
        let config = load_config(
            None,
            env_from(&[
                (ENV_WORKER_ID, "edge-7"),
                (ENV_COMPUTER_ID, "studio-pc"),
                (ENV_NETWORK_IDS, "studio, archive ,"),
                (ENV_DRIVE_LETTERS, "q;r"),
                (ENV_DRIVE_MAPPING, "yes"),
                (ENV_LOG_FORMAT, "JSON"),
            ]),
        )?;
        assert_eq!(config.worker_id, "edge-7");
        assert_eq!(config.location.local_computer_id, "studio-pc");
        assert_eq!(config.location.local_network_ids, vec!["studio", "archive"]);
        assert_eq!(config.windows_drive_letters, vec!['Q', 'R']);
        assert!(config.drive_mapping.enabled);
        assert_eq!(config.logging.format, Some(LogFormatSetting::Json));
        Ok(())
    }

    #[test]
    fn malformed_overrides_are_rejected() {
        assert!(matches!(
            load_config(None, env_from(&[(ENV_DRIVE_MAPPING, "maybe")])),
            Err(ConfigError::InvalidOverride {
                key: ENV_DRIVE_MAPPING,
                ..
            })
        ));
        assert!(matches!(
            load_config(None, env_from(&[(ENV_DRIVE_LETTERS, "XY;Z")])),
            Err(ConfigError::InvalidOverride {
                key: ENV_DRIVE_LETTERS,
                ..
            })
        ));
        assert!(matches!(
            load_config(None, env_from(&[(ENV_LOG_FORMAT, "xml")])),
            Err(ConfigError::InvalidOverride { .. })
        ));
    }

    #[test]
    fn missing_file_reports_io_error() {
        let result = load_config(Some(Path::new("/nonexistent/ferry.json")), env_from(&[]));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
