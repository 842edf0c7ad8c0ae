//! The package worker: bids on expectations, executes them and maintains
//! package containers.
//!
//! # Design
//! - Every protocol call dispatches with an exhaustive `match` over the
//!   expectation type; adding a type fails to compile until it is handled here.
//! - Expectations seen by readiness and fulfilment checks are tracked in the
//!   registry, which drives dependency gating and trigger notifications.
//! - Container maintenance uses the first accessor this worker can reach.

use async_trait::async_trait;
use ferry_accessors::{AccessorContext, AccessorHandle, HandleContent, supports_access};
use ferry_config::WorkerConfig;
use ferry_core::{
    AccessResult, Expectation, ExpectationSpec, ExpectationWorker, FulfilledOutcome, MonitorSet,
    PackageContainerExpectation, PackageResult, ReadyOutcome, Reason, RemovedOutcome,
    SupportOutcome, WorkInProgress, WorkOptions,
};
use ferry_telemetry::Metrics;
use tracing::{debug, info, warn};

use crate::cost::CostModel;
use crate::expectations::{HandlerContext, media_file_copy, media_file_scan, tape_clip_copy};
use crate::probe::MediaProbe;
use crate::registry::ExpectationRegistry;

/// Worker implementing the expectation protocol over the configured backends.
#[derive(Clone)]
pub struct PackageWorker {
    worker_id: String,
    ctx: HandlerContext,
}

impl std::fmt::Debug for PackageWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageWorker")
            .field("worker_id", &self.worker_id)
            .field("registry", &self.ctx.registry)
            .finish_non_exhaustive()
    }
}

impl PackageWorker {
    /// Worker with default costs and probe settings.
    #[must_use]
    pub fn new(worker_id: impl Into<String>, accessors: AccessorContext) -> Self {
        let registry = ExpectationRegistry::new(accessors.events().clone());
        Self {
            worker_id: worker_id.into(),
            ctx: HandlerContext {
                accessors,
                registry,
                costs: CostModel::default(),
                probe: MediaProbe::from_config(&ferry_config::ProbeConfig::default()),
                metrics: None,
            },
        }
    }

    /// Worker configured from `config`.
    #[must_use]
    pub fn from_config(config: &WorkerConfig, accessors: AccessorContext) -> Self {
        Self::new(&config.worker_id, accessors)
            .with_costs(CostModel::new(config.costs))
            .with_probe(MediaProbe::from_config(&config.probe))
    }

    /// Record work outcomes in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.ctx.metrics = Some(metrics);
        self
    }

    /// Use `probe` for media scans.
    #[must_use]
    pub fn with_probe(mut self, probe: MediaProbe) -> Self {
        self.ctx.probe = probe;
        self
    }

    /// Use `costs` for bids.
    #[must_use]
    pub const fn with_costs(mut self, costs: CostModel) -> Self {
        self.ctx.costs = costs;
        self
    }

    /// Identifier of this worker.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Expectations tracked by this worker.
    #[must_use]
    pub const fn registry(&self) -> &ExpectationRegistry {
        &self.ctx.registry
    }

    fn track(&self, expectation: &Expectation) {
        if self.ctx.registry.get(&expectation.id).as_ref() != Some(expectation) {
            self.ctx.registry.upsert(expectation.clone());
        }
    }

    /// Handle for the first accessor of `container` this worker can reach.
    fn container_handle(&self, container: &PackageContainerExpectation) -> Result<AccessorHandle, Reason> {
        let mut last_failure = Reason::plain("No supported accessor found");
        for (accessor_id, accessor) in &container.accessors {
            if !supports_access(self.ctx.accessors.location(), accessor) {
                continue;
            }
            match AccessorHandle::new(
                &self.ctx.accessors,
                accessor_id,
                accessor,
                HandleContent::ContainerOnly,
                WorkOptions::default(),
            ) {
                Ok(handle) => return Ok(handle),
                Err(err) => last_failure = err.reason(),
            }
        }
        Err(last_failure)
    }
}

#[async_trait]
impl ExpectationWorker for PackageWorker {
    fn do_you_support_expectation(&self, expectation: &Expectation) -> SupportOutcome {
        match &expectation.spec {
            ExpectationSpec::MediaFileCopy(_) => media_file_copy::support(&self.ctx, expectation),
            ExpectationSpec::MediaFileScan(_) => media_file_scan::support(&self.ctx, expectation),
            ExpectationSpec::TapeClipCopy(_) => tape_clip_copy::support(&self.ctx, expectation),
        }
    }

    async fn get_cost_for_expectation(&self, expectation: &Expectation) -> PackageResult<u64> {
        match &expectation.spec {
            ExpectationSpec::MediaFileCopy(copy) => media_file_copy::cost(&self.ctx, expectation, copy).await,
            ExpectationSpec::MediaFileScan(scan) => media_file_scan::cost(&self.ctx, expectation, scan).await,
            ExpectationSpec::TapeClipCopy(copy) => tape_clip_copy::cost(&self.ctx, expectation, copy).await,
        }
    }

    async fn is_expectation_ready_to_start_working_on(&self, expectation: &Expectation) -> ReadyOutcome {
        self.track(expectation);
        match &expectation.spec {
            ExpectationSpec::MediaFileCopy(copy) => media_file_copy::ready(&self.ctx, expectation, copy).await,
            ExpectationSpec::MediaFileScan(scan) => media_file_scan::ready(&self.ctx, expectation, scan).await,
            ExpectationSpec::TapeClipCopy(copy) => tape_clip_copy::ready(&self.ctx, expectation, copy).await,
        }
    }

    async fn is_expectation_fullfilled(&self, expectation: &Expectation, was_fullfilled: bool) -> FulfilledOutcome {
        self.track(expectation);
        let outcome = match &expectation.spec {
            ExpectationSpec::MediaFileCopy(copy) => {
                media_file_copy::fulfilled(&self.ctx, expectation, copy).await
            }
            ExpectationSpec::MediaFileScan(scan) => {
                media_file_scan::fulfilled(&self.ctx, expectation, scan).await
            }
            ExpectationSpec::TapeClipCopy(copy) => {
                tape_clip_copy::fulfilled(&self.ctx, expectation, copy).await
            }
        };
        if outcome.fulfilled {
            let triggered = self.ctx.registry.mark_fulfilled(&expectation.id);
            if !triggered.is_empty() {
                info!(expectation_id = %expectation.id, triggered = ?triggered, "expectation fulfilled");
            }
        } else {
            self.ctx.registry.mark_unfulfilled(&expectation.id);
            if was_fullfilled {
                debug!(
                    expectation_id = %expectation.id,
                    reason = %outcome.reason.tech,
                    "previously fulfilled expectation no longer holds"
                );
            }
        }
        outcome
    }

    async fn work_on_expectation(&self, expectation: &Expectation) -> PackageResult<WorkInProgress> {
        match &expectation.spec {
            ExpectationSpec::MediaFileCopy(copy) => media_file_copy::work(&self.ctx, expectation, copy).await,
            ExpectationSpec::MediaFileScan(scan) => media_file_scan::work(&self.ctx, expectation, scan).await,
            ExpectationSpec::TapeClipCopy(copy) => tape_clip_copy::work(&self.ctx, expectation, copy).await,
        }
    }

    async fn remove_expectation(&self, expectation: &Expectation) -> RemovedOutcome {
        match &expectation.spec {
            ExpectationSpec::MediaFileCopy(copy) => media_file_copy::remove(&self.ctx, expectation, copy).await,
            ExpectationSpec::MediaFileScan(scan) => media_file_scan::remove(&self.ctx, expectation, scan).await,
            ExpectationSpec::TapeClipCopy(copy) => tape_clip_copy::remove(&self.ctx, expectation, copy).await,
        }
    }

    fn do_you_support_package_container(&self, container: &PackageContainerExpectation) -> SupportOutcome {
        let location = self.ctx.accessors.location();
        if container
            .accessors
            .values()
            .any(|accessor| supports_access(location, accessor))
        {
            SupportOutcome::supported(Reason::plain("Worker supports the package container"))
        } else {
            SupportOutcome::unsupported(Reason::new(
                "Package container not supported",
                format!("No accessor of \"{}\" is reachable from this worker", container.label),
            ))
        }
    }

    async fn run_package_container_cron_job(&self, container: &PackageContainerExpectation) -> AccessResult {
        let handle = self.container_handle(container)?;
        let result = handle.run_cron_job(container).await;
        if let Err(reason) = &result {
            warn!(container = %container.id, reason = %reason.tech, "package container cron job failed");
            if let Some(metrics) = &self.ctx.metrics {
                metrics.inc_cron_failure();
            }
        }
        result
    }

    async fn setup_package_container_monitors(
        &self,
        container: &PackageContainerExpectation,
    ) -> Result<MonitorSet, Reason> {
        let handle = self.container_handle(container)?;
        let monitors = handle.setup_package_container_monitors(container).await?;
        info!(container = %container.id, monitors = monitors.len(), "package container monitors started");
        Ok(monitors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_config::LocationConfig;
    use ferry_core::{
        AccessorOnPackage, FileContent, FileTargetRequirement, FileVersion, MediaFileCopy,
        PackageContainerOnPackage, SourceRequirement, StatusReport,
    };
    use ferry_events::EventBus;

    fn worker() -> PackageWorker {
        let location = LocationConfig {
            local_computer_id: "studio-pc".into(),
            local_network_ids: vec!["studio-lan".into()],
        };
        PackageWorker::new("worker-a", AccessorContext::new(location, EventBus::new()))
    }

    fn copy(source: AccessorOnPackage, target: AccessorOnPackage) -> Expectation {
        Expectation {
            id: "copy-1".into(),
            status_report: StatusReport::default(),
            depends_on_fullfilled_ids: Vec::new(),
            trigger_by_fullfilled_ids: Vec::new(),
            work_options: WorkOptions::default(),
            spec: ExpectationSpec::MediaFileCopy(MediaFileCopy {
                start_requirement: SourceRequirement {
                    sources: vec![PackageContainerOnPackage::new("ingest", "Ingest").with_accessor("a", source)],
                },
                end_requirement: FileTargetRequirement {
                    targets: vec![PackageContainerOnPackage::new("playout", "Playout").with_accessor("b", target)],
                    content: FileContent::new("report.mov"),
                    version: FileVersion::default(),
                },
            }),
        }
    }

    #[test]
    fn foreign_sources_are_not_supported() {
        let outcome = worker().do_you_support_expectation(&copy(
            AccessorOnPackage::local_folder("other-pc", "/media").readable(),
            AccessorOnPackage::local_folder("studio-pc", "/playout").writable(),
        ));
        assert!(!outcome.support);
        assert_eq!(outcome.reason.user, "Source not supported");
    }

    #[test]
    fn record_store_is_not_a_copy_target() {
        let outcome = worker().do_you_support_expectation(&copy(
            AccessorOnPackage::local_folder("studio-pc", "/media").readable(),
            AccessorOnPackage::core_package_info().writable(),
        ));
        assert_eq!(outcome.reason.user, "Target not supported");
    }

    #[tokio::test]
    async fn unreachable_container_has_no_cron_accessor() {
        let container = PackageContainerExpectation {
            id: "remote".into(),
            label: "Remote".into(),
            accessors: [(
                "a".to_string(),
                AccessorOnPackage::local_folder("other-pc", "/media"),
            )]
            .into_iter()
            .collect(),
            cronjobs: ferry_core::CronjobSettings::default(),
            monitors: ferry_core::MonitorSettings::default(),
        };
        let worker = worker();
        assert!(!worker.do_you_support_package_container(&container).support);
        let failure = worker.run_package_container_cron_job(&container).await.err();
        assert_eq!(
            failure.map(|reason| reason.user).as_deref(),
            Some("No supported accessor found")
        );
    }
}
