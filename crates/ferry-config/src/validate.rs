//! Validation and normalisation of worker configuration.

use std::collections::HashSet;

use crate::error::{ConfigError, ConfigResult};
use crate::model::WorkerConfig;

/// Validate `config`, upper-casing drive letters.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] naming the first field that fails.
pub fn validate(mut config: WorkerConfig) -> ConfigResult<WorkerConfig> {
    require_non_empty("workerId", &config.worker_id)?;
    require_non_empty("location.localComputerId", &config.location.local_computer_id)?;
    if config
        .location
        .local_network_ids
        .iter()
        .any(|id| id.trim().is_empty())
    {
        return Err(ConfigError::InvalidField {
            field: "location.localNetworkIds",
            reason: "must not contain empty identifiers",
            value: None,
        });
    }

    config.windows_drive_letters = normalize_drive_letters(&config.windows_drive_letters)?;

    let mapping = config.drive_mapping;
    if mapping.outer_timeout_ms == 0 {
        return Err(ConfigError::invalid(
            "driveMapping.outerTimeoutMs",
            "must be positive",
            mapping.outer_timeout_ms,
        ));
    }
    if mapping.inner_timeout_ms == 0 || mapping.inner_timeout_ms >= mapping.outer_timeout_ms {
        return Err(ConfigError::invalid(
            "driveMapping.innerTimeoutMs",
            "must be positive and below the outer timeout",
            mapping.inner_timeout_ms,
        ));
    }

    require_non_empty("probe.executable", &config.probe.executable)?;
    if config.probe.timeout_ms == 0 {
        return Err(ConfigError::invalid(
            "probe.timeoutMs",
            "must be positive",
            config.probe.timeout_ms,
        ));
    }

    let costs = config.costs;
    for (field, value) in [
        ("costs.localFolder", costs.local_folder),
        ("costs.mappedDrive", costs.mapped_drive),
        ("costs.fileShare", costs.file_share),
        ("costs.http", costs.http),
        ("costs.tape", costs.tape),
        ("costs.scan", costs.scan),
    ] {
        if value == 0 {
            return Err(ConfigError::invalid(field, "must be positive", value));
        }
    }

    require_non_empty("logging.level", &config.logging.level)?;
    Ok(config)
}

/// Upper-case and de-duplicate-check a list of drive letters.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for non-letters or duplicates.
pub fn normalize_drive_letters(letters: &[char]) -> ConfigResult<Vec<char>> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(letters.len());
    for letter in letters {
        if !letter.is_ascii_alphabetic() {
            return Err(ConfigError::invalid(
                "windowsDriveLetters",
                "must contain only letters A-Z",
                letter,
            ));
        }
        let upper = letter.to_ascii_uppercase();
        if !seen.insert(upper) {
            return Err(ConfigError::invalid(
                "windowsDriveLetters",
                "must not contain duplicates",
                upper,
            ));
        }
        normalized.push(upper);
    }
    Ok(normalized)
}

fn require_non_empty(field: &'static str, value: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidField {
            field,
            reason: "must not be empty",
            value: None,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate(WorkerConfig::default()).is_ok());
    }

    #[test]
    fn drive_letters_are_upper_cased() -> anyhow::Result<()> {
        assert_eq!(normalize_drive_letters(&['x', 'Y'])?, vec!['X', 'Y']);
        Ok(())
    }

    #[test]
    fn drive_letters_reject_digits_and_duplicates() {
        assert!(matches!(
            normalize_drive_letters(&['1']),
            Err(ConfigError::InvalidField {
                field: "windowsDriveLetters",
                ..
            })
        ));
        assert!(matches!(
            normalize_drive_letters(&['z', 'Z']),
            Err(ConfigError::InvalidField {
                reason: "must not contain duplicates",
                ..
            })
        ));
    }

    #[test]
    fn inner_timeout_must_stay_below_outer() {
        let mut config = WorkerConfig::default();
        config.drive_mapping.inner_timeout_ms = config.drive_mapping.outer_timeout_ms;
        assert!(matches!(
            validate(config),
            Err(ConfigError::InvalidField {
                field: "driveMapping.innerTimeoutMs",
                ..
            })
        ));
    }

    #[test]
    fn empty_computer_id_is_rejected() {
        let mut config = WorkerConfig::default();
        config.location.local_computer_id = "  ".into();
        assert!(matches!(
            validate(config),
            Err(ConfigError::InvalidField {
                field: "location.localComputerId",
                ..
            })
        ));
    }

    #[test]
    fn zero_cost_class_is_rejected() {
        let mut config = WorkerConfig::default();
        config.costs.tape = 0;
        assert!(validate(config).is_err());
    }
}
