//! Package containers, both as referenced by expectations and as maintained
//! by cron jobs and monitors.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::accessor::{AccessorId, AccessorOnPackage};

/// Storage location referenced from an expectation's sources or targets.
///
/// Accessors keep their declaration order; lookup tries them in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageContainerOnPackage {
    /// Container identifier.
    pub container_id: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Named accessors in declaration order.
    pub accessors: IndexMap<AccessorId, AccessorOnPackage>,
}

impl PackageContainerOnPackage {
    /// Container with no accessors yet.
    pub fn new(container_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            label: label.into(),
            accessors: IndexMap::new(),
        }
    }

    /// Append an accessor.
    #[must_use]
    pub fn with_accessor(mut self, id: impl Into<AccessorId>, accessor: AccessorOnPackage) -> Self {
        self.accessors.insert(id.into(), accessor);
        self
    }
}

/// A container maintained on its own, independent of any single package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageContainerExpectation {
    /// Container identifier.
    pub id: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Named accessors in declaration order.
    pub accessors: IndexMap<AccessorId, AccessorOnPackage>,
    /// Periodic maintenance configuration.
    #[serde(default)]
    pub cronjobs: CronjobSettings,
    /// Change-detection configuration.
    #[serde(default)]
    pub monitors: MonitorSettings,
}

/// Configured cron jobs; each key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronjobSettings {
    /// Scheduling hint for the external scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<IntervalCronjob>,
    /// Delayed-removal completion and age-based purge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupCronjob>,
}

/// Interval hint, in seconds between cron runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalCronjob {
    /// Seconds between runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,
}

/// Cleanup options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupCronjob {
    /// Remove artifacts older than this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_file_age: Option<u64>,
}

/// One configured cron job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cronjob<'a> {
    /// Scheduling hint; nothing to execute.
    Interval(&'a IntervalCronjob),
    /// Complete matured removals then purge old files.
    Cleanup(&'a CleanupCronjob),
}

impl CronjobSettings {
    /// Configured jobs in a fixed order.
    #[must_use]
    pub fn jobs(&self) -> Vec<Cronjob<'_>> {
        let mut jobs = Vec::new();
        if let Some(interval) = &self.interval {
            jobs.push(Cronjob::Interval(interval));
        }
        if let Some(cleanup) = &self.cleanup {
            jobs.push(Cronjob::Cleanup(cleanup));
        }
        jobs
    }
}

/// Configured monitors; each key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSettings {
    /// Watch the container for package changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<PackagesMonitor>,
}

/// Options for the packages monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagesMonitor {
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Paths containing this substring are not reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore: Option<String>,
}

/// One configured monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Monitor<'a> {
    /// Filesystem-change watch over the container.
    Packages(&'a PackagesMonitor),
}

impl Monitor<'_> {
    /// Key under which the monitor is configured and reported.
    #[must_use]
    pub const fn monitor_id(&self) -> &'static str {
        match self {
            Self::Packages(_) => "packages",
        }
    }
}

impl MonitorSettings {
    /// Configured monitors in a fixed order.
    #[must_use]
    pub fn monitors(&self) -> Vec<Monitor<'_>> {
        self.packages.iter().map(Monitor::Packages).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_expectation_decodes_jobs_and_monitors() -> anyhow::Result<()> {
        let container: PackageContainerExpectation = serde_json::from_str(
            r#"{
                "id": "playout",
                "label": "Playout",
                "accessors": {},
                "cronjobs": { "interval": {}, "cleanup": { "cleanFileAge": 3600 } },
                "monitors": { "packages": { "label": "Watch", "ignore": ".tmp" } }
            }"#,
        )?;
        let jobs = container.cronjobs.jobs();
        assert_eq!(jobs.len(), 2);
        assert!(matches!(
            jobs[1],
            Cronjob::Cleanup(CleanupCronjob {
                clean_file_age: Some(3600)
            })
        ));
        let monitors = container.monitors.monitors();
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].monitor_id(), "packages");
        Ok(())
    }

    #[test]
    fn accessors_keep_declaration_order() -> anyhow::Result<()> {
        let container: PackageContainerOnPackage = serde_json::from_str(
            r#"{
                "containerId": "source",
                "accessors": {
                    "zeta": { "type": "HTTP" },
                    "alpha": { "type": "LOCAL_FOLDER" }
                }
            }"#,
        )?;
        let ids: Vec<&str> = container.accessors.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
        Ok(())
    }
}
