//! Process wiring: configuration, logging, metrics, drive mapping and the worker.

use std::path::PathBuf;
use std::sync::Arc;

use ferry_accessors::AccessorContext;
use ferry_config::{LogFormatSetting, WorkerConfig, load_from_process_env};
use ferry_drives::{DriveLetterManager, DriveSettings, MemoryWorkerStorage, NetUseDrive, NetworkDrive, WorkerStorage};
use ferry_events::EventBus;
use ferry_telemetry::{LogFormat, LoggingConfig, Metrics, build_sha, init_logging};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::worker::PackageWorker;

/// Names the JSON configuration file to load.
pub const ENV_CONFIG_PATH: &str = "FERRY_CONFIG";

/// A wired worker and the shared services around it.
#[derive(Clone)]
pub struct WorkerRuntime {
    /// The protocol implementation.
    pub worker: Arc<PackageWorker>,
    /// Bus carrying work, drive and container events.
    pub events: EventBus,
    /// Process metrics.
    pub metrics: Metrics,
}

/// Wire a worker from `config`, mapping shares through `drive` and sharing
/// drive letters through `storage`.
///
/// # Errors
///
/// Returns [`WorkerError::Telemetry`] when the metrics registry cannot be built.
pub fn build_worker(
    config: &WorkerConfig,
    drive: Arc<dyn NetworkDrive>,
    storage: Arc<dyn WorkerStorage>,
) -> WorkerResult<WorkerRuntime> {
    let events = EventBus::new();
    let metrics = Metrics::new().map_err(|err| WorkerError::telemetry("telemetry.metrics", err))?;
    let drives = DriveLetterManager::new(storage, drive, DriveSettings::from_config(config))
        .with_events(events.clone())
        .with_metrics(metrics.clone());
    let accessors = AccessorContext::new(config.location.clone(), events.clone()).with_drives(drives);
    let worker = PackageWorker::from_config(config, accessors).with_metrics(metrics.clone());
    Ok(WorkerRuntime {
        worker: Arc::new(worker),
        events,
        metrics,
    })
}

/// Count every published event in `metrics` until the bus closes.
pub fn spawn_event_metrics(events: &EventBus, metrics: &Metrics) -> JoinHandle<()> {
    let mut stream = events.subscribe(None);
    let metrics = metrics.clone();
    tokio::spawn(async move {
        while let Some(envelope) = stream.next().await {
            metrics.inc_event(envelope.event.kind());
        }
    })
}

const fn log_format(setting: Option<LogFormatSetting>) -> LogFormat {
    match setting {
        Some(LogFormatSetting::Json) => LogFormat::Json,
        Some(LogFormatSetting::Pretty) => LogFormat::Pretty,
        None => LogFormat::infer(),
    }
}

/// Boot the worker process and run until interrupted.
///
/// # Errors
///
/// Returns an error when configuration, logging or the shutdown signal fails.
pub async fn run_worker() -> WorkerResult<()> {
    let path = std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from);
    let config =
        load_from_process_env(path.as_deref()).map_err(|err| WorkerError::config("config.load", err))?;
    init_logging(&LoggingConfig {
        level: &config.logging.level,
        format: log_format(config.logging.format),
        build_sha: build_sha(),
    })
    .map_err(|err| WorkerError::telemetry("telemetry.init", err))?;

    let runtime = build_worker(
        &config,
        Arc::new(NetUseDrive::default()),
        Arc::new(MemoryWorkerStorage::new()),
    )?;
    let counter = spawn_event_metrics(&runtime.events, &runtime.metrics);
    info!(
        worker_id = %runtime.worker.worker_id(),
        computer_id = %config.location.local_computer_id,
        "worker ready"
    );

    let signal = tokio::signal::ctrl_c().await;
    counter.abort();
    let snapshot = runtime.metrics.snapshot();
    info!(
        completed = snapshot.work_completed_total,
        failed = snapshot.work_failed_total,
        cancelled = snapshot.work_cancelled_total,
        "worker shutting down"
    );
    signal.map_err(|source| {
        warn!(error = %source, "failed to listen for shutdown signal");
        WorkerError::Signal { source }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_events::Event;
    use std::time::Duration;

    #[test]
    fn configured_format_wins_over_inference() {
        assert_eq!(log_format(Some(LogFormatSetting::Json)), LogFormat::Json);
        assert_eq!(log_format(Some(LogFormatSetting::Pretty)), LogFormat::Pretty);
        assert_eq!(log_format(None), LogFormat::infer());
    }

    #[tokio::test]
    async fn published_events_are_counted() -> anyhow::Result<()> {
        let runtime = build_worker(
            &WorkerConfig::default(),
            Arc::new(NetUseDrive::default()),
            Arc::new(MemoryWorkerStorage::new()),
        )?;
        let counter = spawn_event_metrics(&runtime.events, &runtime.metrics);
        runtime.events.publish(Event::HealthChanged { degraded: Vec::new() });

        tokio::time::timeout(Duration::from_secs(1), async {
            while !runtime.metrics.render().unwrap_or_default().contains("health_changed") {
                tokio::task::yield_now().await;
            }
        })
        .await?;
        counter.abort();
        assert!(runtime.worker.registry().is_empty());
        Ok(())
    }
}
