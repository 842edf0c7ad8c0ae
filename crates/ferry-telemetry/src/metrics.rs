//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges a package worker reports: work
//!   lifecycle, drive mapping, cron failures and emitted events.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across worker components.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    work_started_total: IntCounterVec,
    work_completed_total: IntCounter,
    work_failed_total: IntCounter,
    work_cancelled_total: IntCounter,
    active_work: IntGauge,
    drive_mounts_total: IntCounterVec,
    drive_cache_hits_total: IntCounter,
    events_emitted_total: IntCounterVec,
    cron_failures_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Work units currently running.
    pub active_work: i64,
    /// Work units that completed successfully.
    pub work_completed_total: u64,
    /// Work units that failed.
    pub work_failed_total: u64,
    /// Work units cancelled before finishing.
    pub work_cancelled_total: u64,
    /// Drive-letter lookups answered without running the mount tool.
    pub drive_cache_hits_total: u64,
    /// Container cron runs that reported a failure.
    pub cron_failures_total: u64,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

fn collector<T>(name: &'static str, built: prometheus::Result<T>) -> Result<T> {
    built.map_err(|source| TelemetryError::metric("build", name, source))
}

fn register<C>(registry: &Registry, name: &'static str, metric: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(metric.clone()))
        .map_err(|source| TelemetryError::metric("register", name, source))
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let work_started_total = collector(
            "work_started_total",
            IntCounterVec::new(
                Opts::new("work_started_total", "Work units started by expectation type"),
                &["type"],
            ),
        )?;
        let work_completed_total = collector(
            "work_completed_total",
            IntCounter::with_opts(Opts::new(
                "work_completed_total",
                "Work units completed successfully",
            )),
        )?;
        let work_failed_total = collector(
            "work_failed_total",
            IntCounter::with_opts(Opts::new("work_failed_total", "Work units that failed")),
        )?;
        let work_cancelled_total = collector(
            "work_cancelled_total",
            IntCounter::with_opts(Opts::new(
                "work_cancelled_total",
                "Work units cancelled before finishing",
            )),
        )?;
        let active_work = collector(
            "active_work",
            IntGauge::with_opts(Opts::new("active_work", "Work units currently running")),
        )?;
        let drive_mounts_total = collector(
            "drive_mounts_total",
            IntCounterVec::new(
                Opts::new("drive_mounts_total", "Drive-letter mount attempts by outcome"),
                &["outcome"],
            ),
        )?;
        let drive_cache_hits_total = collector(
            "drive_cache_hits_total",
            IntCounter::with_opts(Opts::new(
                "drive_cache_hits_total",
                "Drive-letter lookups served from the shared mapping",
            )),
        )?;
        let events_emitted_total = collector(
            "events_emitted_total",
            IntCounterVec::new(
                Opts::new("events_emitted_total", "Worker events emitted by type"),
                &["type"],
            ),
        )?;
        let cron_failures_total = collector(
            "cron_failures_total",
            IntCounter::with_opts(Opts::new(
                "cron_failures_total",
                "Container cron runs that reported a failure",
            )),
        )?;

        register(&registry, "work_started_total", &work_started_total)?;
        register(&registry, "work_completed_total", &work_completed_total)?;
        register(&registry, "work_failed_total", &work_failed_total)?;
        register(&registry, "work_cancelled_total", &work_cancelled_total)?;
        register(&registry, "active_work", &active_work)?;
        register(&registry, "drive_mounts_total", &drive_mounts_total)?;
        register(&registry, "drive_cache_hits_total", &drive_cache_hits_total)?;
        register(&registry, "events_emitted_total", &events_emitted_total)?;
        register(&registry, "cron_failures_total", &cron_failures_total)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                work_started_total,
                work_completed_total,
                work_failed_total,
                work_cancelled_total,
                active_work,
                drive_mounts_total,
                drive_cache_hits_total,
                events_emitted_total,
                cron_failures_total,
            }),
        })
    }

    /// Record a work unit starting for the given expectation type.
    pub fn inc_work_started(&self, expectation_type: &str) {
        self.inner
            .work_started_total
            .with_label_values(&[expectation_type])
            .inc();
        self.inner.active_work.inc();
    }

    /// Record a successful completion.
    pub fn inc_work_completed(&self) {
        self.inner.work_completed_total.inc();
        self.inner.active_work.dec();
    }

    /// Record a failed work unit.
    pub fn inc_work_failed(&self) {
        self.inner.work_failed_total.inc();
        self.inner.active_work.dec();
    }

    /// Record a cancelled work unit.
    pub fn inc_work_cancelled(&self) {
        self.inner.work_cancelled_total.inc();
        self.inner.active_work.dec();
    }

    /// Record a drive-letter mount attempt (`mapped`, `reused`, `failed`, `timeout`).
    pub fn inc_drive_mount(&self, outcome: &str) {
        self.inner
            .drive_mounts_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a drive-letter lookup served from the shared mapping.
    pub fn inc_drive_cache_hit(&self) {
        self.inner.drive_cache_hits_total.inc();
    }

    /// Increment the emitted event counter for the specific event type.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Increment the cron failure counter.
    pub fn inc_cron_failure(&self) {
        self.inner.cron_failures_total.inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::Encode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::Utf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_work: self.inner.active_work.get(),
            work_completed_total: self.inner.work_completed_total.get(),
            work_failed_total: self.inner.work_failed_total.get(),
            work_cancelled_total: self.inner.work_cancelled_total.get(),
            drive_cache_hits_total: self.inner.drive_cache_hits_total.get(),
            cron_failures_total: self.inner.cron_failures_total.get(),
        }
    }
}
