//! Traits implemented by workers and by the external collaborators they use.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AccessResult, PackageResult, Reason};
use crate::model::{Expectation, FileContent, FileVersion, PackageContainerExpectation};
use crate::outcome::{FulfilledOutcome, ReadyOutcome, RemovedOutcome, SupportOutcome};
use crate::work::{MonitorInProgress, WorkInProgress};

/// Monitors started for a container, keyed by monitor id.
pub type MonitorSet = IndexMap<String, MonitorInProgress>;

/// Bidding and execution protocol every worker exposes.
#[async_trait]
pub trait ExpectationWorker: Send + Sync {
    /// Cheap capability check; no side effects.
    fn do_you_support_expectation(&self, expectation: &Expectation) -> SupportOutcome;

    /// Relative execution cost; monotonic in estimated work size.
    async fn get_cost_for_expectation(&self, expectation: &Expectation) -> PackageResult<u64>;

    /// Whether sources are readable, targets writable and dependencies fulfilled.
    async fn is_expectation_ready_to_start_working_on(
        &self,
        expectation: &Expectation,
    ) -> ReadyOutcome;

    /// Compare the resolved source against the stored record of the target.
    async fn is_expectation_fullfilled(
        &self,
        expectation: &Expectation,
        was_fullfilled: bool,
    ) -> FulfilledOutcome;

    /// Accept the expectation and start working on it in the background.
    ///
    /// Setup failures are returned here; execution failures go through the
    /// returned handle.
    async fn work_on_expectation(&self, expectation: &Expectation)
    -> PackageResult<WorkInProgress>;

    /// Reverse the effects of a fulfilled expectation.
    async fn remove_expectation(&self, expectation: &Expectation) -> RemovedOutcome;

    /// Whether the worker can maintain the container; default reports lack of support.
    fn do_you_support_package_container(
        &self,
        container: &PackageContainerExpectation,
    ) -> SupportOutcome {
        let _ = container;
        SupportOutcome::unsupported(Reason::plain(
            "Package container maintenance not supported by this worker",
        ))
    }

    /// Run the container's cron jobs; default reports lack of support.
    async fn run_package_container_cron_job(
        &self,
        container: &PackageContainerExpectation,
    ) -> AccessResult {
        let _ = container;
        Err(Reason::plain("Cron jobs not supported by this worker"))
    }

    /// Start the container's monitors; default reports lack of support.
    async fn setup_package_container_monitors(
        &self,
        container: &PackageContainerExpectation,
    ) -> Result<MonitorSet, Reason> {
        let _ = container;
        Err(Reason::plain("Monitors not supported by this worker"))
    }
}

/// Key of a scan record in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfoKey {
    /// Container the scanned package was read from.
    pub container_id: String,
    /// Scanned package.
    pub content: FileContent,
    /// Version the scan was requested for.
    pub version: FileVersion,
}

impl PackageInfoKey {
    /// Build a key.
    pub fn new(container_id: impl Into<String>, content: FileContent, version: FileVersion) -> Self {
        Self {
            container_id: container_id.into(),
            content,
            version,
        }
    }

    /// Flat string form for keyed storage.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.container_id,
            self.content.file_path,
            self.version.fingerprint()
        )
    }
}

/// Remote record store receiving media scan results.
#[async_trait]
pub trait PackageInfoStore: Send + Sync {
    /// Hash stored with the record, or `None` when no record exists.
    async fn fetch_package_info_hash(&self, key: &PackageInfoKey) -> PackageResult<Option<String>>;

    /// Store (or replace) the record.
    async fn store_package_info(
        &self,
        key: &PackageInfoKey,
        hash: &str,
        payload: Value,
    ) -> PackageResult<()>;

    /// Remove the record; removing an absent record succeeds.
    async fn remove_package_info(&self, key: &PackageInfoKey) -> PackageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_depends_on_version() {
        let content = FileContent::new("clips/report.mov");
        let first = PackageInfoKey::new("ingest", content.clone(), FileVersion::sized(1, 1));
        let second = PackageInfoKey::new("ingest", content, FileVersion::sized(2, 1));
        assert_ne!(first.storage_key(), second.storage_key());
        assert!(first.storage_key().starts_with("ingest:clips/report.mov:"));
    }
}
