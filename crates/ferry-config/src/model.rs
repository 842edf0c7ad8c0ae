//! Typed worker configuration.

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Complete configuration of one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    /// Identifier of this worker.
    pub worker_id: String,
    /// Machine and network identity.
    pub location: LocationConfig,
    /// Candidate drive letters for mapping network shares, in preference order.
    pub windows_drive_letters: Vec<char>,
    /// Drive-letter mapping behaviour.
    pub drive_mapping: DriveMappingConfig,
    /// Media probe subprocess.
    pub probe: ProbeConfig,
    /// Speed classes used for cost estimates.
    pub costs: CostConfig,
    /// Logging preferences.
    pub logging: LoggingSettings,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: defaults::WORKER_ID.to_string(),
            location: LocationConfig::default(),
            windows_drive_letters: defaults::DRIVE_LETTERS.to_vec(),
            drive_mapping: DriveMappingConfig::default(),
            probe: ProbeConfig::default(),
            costs: CostConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Where the worker runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationConfig {
    /// Identity of this physical machine; matched against `resourceId`.
    pub local_computer_id: String,
    /// Networks this machine can reach; matched against `networkId`.
    pub local_network_ids: Vec<String>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            local_computer_id: defaults::LOCAL_COMPUTER_ID.to_string(),
            local_network_ids: Vec::new(),
        }
    }
}

/// Drive-letter mapping settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveMappingConfig {
    /// Map shares onto drive letters; only meaningful on Windows hosts.
    pub enabled: bool,
    /// Bounded wait for the shared store's write lock.
    pub outer_timeout_ms: u64,
    /// Budget for each mount-tool call inside the lock.
    pub inner_timeout_ms: u64,
}

impl Default for DriveMappingConfig {
    fn default() -> Self {
        Self {
            enabled: cfg!(windows),
            outer_timeout_ms: defaults::DRIVE_MAPPING_TIMEOUT_MS,
            inner_timeout_ms: defaults::DRIVE_MAPPING_INNER_TIMEOUT_MS,
        }
    }
}

/// Media probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeConfig {
    /// Executable name or path.
    pub executable: String,
    /// Budget for one probe run.
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            executable: defaults::PROBE_EXECUTABLE.to_string(),
            timeout_ms: defaults::PROBE_TIMEOUT_MS,
        }
    }
}

/// Relative speed class per backend; higher is slower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CostConfig {
    /// Local folders.
    pub local_folder: u64,
    /// Already-mounted drive letters.
    pub mapped_drive: u64,
    /// Network shares.
    pub file_share: u64,
    /// HTTP servers.
    pub http: u64,
    /// Tape archives.
    pub tape: u64,
    /// Media scans, applied on top of the source class.
    pub scan: u64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            local_folder: 1,
            mapped_drive: 2,
            file_share: 3,
            http: 5,
            tape: 10,
            scan: 2,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    /// Human-readable output.
    Pretty,
    /// Structured JSON output.
    Json,
}

/// Logging preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Level or `EnvFilter` directive.
    pub level: String,
    /// Output format; inferred from the build profile when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormatSetting>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: None,
        }
    }
}
