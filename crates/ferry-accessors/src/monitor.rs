//! Filesystem watch over a container folder.
//!
//! # Design
//! - Each monitor owns a `notify` watcher registered recursively on the folder.
//!   The watcher callback forwards event paths over a channel to a spawned
//!   task, which ends when the monitor's stop token fires.
//! - A `walkdir` scan at start seeds a snapshot of size and modification time.
//!   Event paths are re-stated against it, so repeated OS events for an
//!   unchanged file publish nothing.
//! - Bookkeeping files (ledger, sidecars, temporary writes) and paths containing
//!   the configured `ignore` substring are never reported.
//! - Changes are published as `PackageContainerChanged` with paths relative to
//!   the container folder.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ferry_core::{
    Monitor, MonitorInProgress, MonitorSet, PackageContainerExpectation, PackagesMonitor, Reason,
};
use ferry_events::{Event, EventBus};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::file_support::{METADATA_SUFFIX, REMOVAL_LEDGER, TEMPORARY_SUFFIX};

/// Start every monitor configured on `container`, watching `folder`.
///
/// # Errors
///
/// Returns the reason the first monitor failed to start; monitors already
/// started are stopped again.
pub fn setup_folder_monitors(
    events: &EventBus,
    container: &PackageContainerExpectation,
    folder: &Path,
) -> Result<MonitorSet, Reason> {
    let mut monitors = MonitorSet::new();
    for monitor in container.monitors.monitors() {
        let started = match monitor {
            Monitor::Packages(packages) => {
                start_packages_monitor(events.clone(), &container.id, folder, packages)
            }
        };
        match started {
            Ok(handle) => {
                monitors.insert(monitor.monitor_id().to_string(), handle);
            }
            Err(reason) => {
                monitors.values().for_each(MonitorInProgress::stop);
                return Err(reason);
            }
        }
    }
    Ok(monitors)
}

/// Size and modification time of a reported file.
type FileStat = (u64, Option<SystemTime>);

/// Every reported file, keyed by relative path.
type Snapshot = BTreeMap<String, FileStat>;

struct PathFilter {
    root: PathBuf,
    // The OS reports events under the resolved path (e.g. /private/var on macOS).
    canonical_root: Option<PathBuf>,
    ignore: Option<String>,
}

impl PathFilter {
    fn new(folder: &Path, ignore: Option<String>) -> Self {
        Self {
            root: folder.to_path_buf(),
            canonical_root: std::fs::canonicalize(folder)
                .ok()
                .filter(|canonical| canonical != folder),
            ignore: ignore.filter(|ignore| !ignore.is_empty()),
        }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let stripped = path.strip_prefix(&self.root).ok().or_else(|| {
            self.canonical_root
                .as_deref()
                .and_then(|root| path.strip_prefix(root).ok())
        })?;
        let relative = stripped.to_string_lossy().into_owned();
        if relative.is_empty() {
            return None;
        }
        let name = path.file_name()?.to_string_lossy();
        if name == REMOVAL_LEDGER
            || name.ends_with(METADATA_SUFFIX)
            || name.ends_with(TEMPORARY_SUFFIX)
        {
            return None;
        }
        if self
            .ignore
            .as_deref()
            .is_some_and(|ignore| relative.contains(ignore))
        {
            return None;
        }
        Some(relative)
    }

    fn snapshot(&self) -> Snapshot {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = self.relative(entry.path())?;
                let metadata = entry.metadata().ok()?;
                Some((relative, (metadata.len(), metadata.modified().ok())))
            })
            .collect()
    }

    async fn stat(&self, relative: &str) -> Option<FileStat> {
        let metadata = tokio::fs::metadata(self.root.join(relative)).await.ok()?;
        metadata
            .is_file()
            .then(|| (metadata.len(), metadata.modified().ok()))
    }
}

/// Record the current state of `relative`; returns whether it differs from the snapshot.
fn apply(snapshot: &mut Snapshot, relative: &str, current: Option<FileStat>) -> bool {
    match current {
        Some(stat) => snapshot.insert(relative.to_string(), stat) != Some(stat),
        None => snapshot.remove(relative).is_some(),
    }
}

fn watch(folder: &Path, sender: mpsc::UnboundedSender<Vec<PathBuf>>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<notify::Event>| match result {
            Ok(event) => {
                if !event.paths.is_empty() {
                    let _ = sender.send(event.paths);
                }
            }
            Err(err) => warn!(error = %err, "packages monitor watch error"),
        },
        notify::Config::default(),
    )?;
    watcher.watch(folder, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Watch `folder` recursively and publish package changes for `container_id`.
///
/// # Errors
///
/// Returns a reason when `folder` is not an accessible directory or the OS
/// refuses the watch.
pub fn start_packages_monitor(
    events: EventBus,
    container_id: &str,
    folder: &Path,
    monitor: &PackagesMonitor,
) -> Result<MonitorInProgress, Reason> {
    match std::fs::metadata(folder) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(Reason::new(
                "Not able to monitor container folder",
                format!("\"{}\" is not a folder", folder.display()),
            ));
        }
        Err(err) => {
            return Err(Reason::new(
                "Not able to monitor container folder",
                format!("Not able to monitor \"{}\": {err}", folder.display()),
            ));
        }
    }

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let watcher = watch(folder, sender).map_err(|err| {
        Reason::new(
            "Not able to monitor container folder",
            format!("Not able to watch \"{}\": {err}", folder.display()),
        )
    })?;

    let (handle, stop) = MonitorInProgress::new("packages", monitor.label.clone());
    let filter = PathFilter::new(folder, monitor.ignore.clone());
    let mut snapshot = filter.snapshot();
    let container_id = container_id.to_string();
    debug!(container_id = %container_id, folder = %folder.display(), "packages monitor started");

    tokio::spawn(async move {
        let _watcher = watcher;
        loop {
            let mut batch = tokio::select! {
                () = stop.cancelled() => break,
                batch = receiver.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };
            while let Ok(more) = receiver.try_recv() {
                batch.extend(more);
            }
            let mut relative: Vec<String> = batch
                .iter()
                .filter_map(|path| filter.relative(path))
                .collect();
            relative.sort();
            relative.dedup();

            let mut paths = Vec::new();
            for path in relative {
                let current = filter.stat(&path).await;
                if apply(&mut snapshot, &path, current) {
                    paths.push(path);
                }
            }
            if !paths.is_empty() {
                events.publish(Event::PackageContainerChanged {
                    container_id: container_id.clone(),
                    monitor_id: "packages".to_string(),
                    paths,
                });
            }
        }
        debug!(container_id = %container_id, "packages monitor stopped");
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    async fn next_change(
        stream: &mut ferry_events::EventStream,
    ) -> anyhow::Result<(String, Vec<String>)> {
        let changed = timeout(Duration::from_secs(5), async {
            loop {
                match stream.next().await.map(|envelope| envelope.event) {
                    Some(Event::PackageContainerChanged { container_id, paths, .. }) => {
                        return Some((container_id, paths));
                    }
                    Some(_) => {}
                    None => return None,
                }
            }
        })
        .await?;
        changed.ok_or_else(|| anyhow::anyhow!("event bus closed"))
    }

    #[cfg(unix)]
    #[test]
    fn bookkeeping_and_ignored_paths_are_filtered() {
        let filter = PathFilter::new(Path::new("/media/playout"), Some("proxy".into()));
        assert_eq!(
            filter.relative(Path::new("/media/playout/news/report.mov")).as_deref(),
            Some("news/report.mov")
        );
        assert_eq!(filter.relative(Path::new("/media/playout/report.mov_metadata.json")), None);
        assert_eq!(filter.relative(Path::new("/media/playout/report.mov.pmtemp")), None);
        assert_eq!(filter.relative(Path::new("/media/playout/__removePackages.json")), None);
        assert_eq!(filter.relative(Path::new("/media/playout/proxy/report.mov")), None);
        assert_eq!(filter.relative(Path::new("/elsewhere/report.mov")), None);
    }

    #[test]
    fn repeated_events_for_an_unchanged_file_are_dropped() {
        let mut snapshot: Snapshot = [("kept.mov".to_string(), (10, None))].into_iter().collect();
        assert!(!apply(&mut snapshot, "kept.mov", Some((10, None))));
        assert!(apply(&mut snapshot, "kept.mov", Some((20, None))));
        assert!(apply(&mut snapshot, "new.mov", Some((1, None))));
        assert!(apply(&mut snapshot, "new.mov", None));
        assert!(!apply(&mut snapshot, "never.mov", None));
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["kept.mov"]);
    }

    #[test]
    fn missing_folder_cannot_be_monitored() {
        let monitor = PackagesMonitor {
            label: "Watch".into(),
            ignore: None,
        };
        let failure = start_packages_monitor(
            EventBus::new(),
            "playout",
            Path::new("/definitely/not/here"),
            &monitor,
        )
        .err();
        assert_eq!(
            failure.map(|reason| reason.user).as_deref(),
            Some("Not able to monitor container folder")
        );
    }

    #[tokio::test]
    async fn file_changes_are_published_until_stopped() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let events = EventBus::new();
        let mut stream = events.subscribe(None);
        let monitor = PackagesMonitor {
            label: "Watch playout".into(),
            ignore: None,
        };
        let handle = start_packages_monitor(events.clone(), "playout", dir.path(), &monitor)?;
        assert_eq!(handle.monitor_id(), "packages");

        std::fs::write(dir.path().join("report.mov"), b"payload")?;
        let (container_id, paths) = next_change(&mut stream).await?;
        assert_eq!(container_id, "playout");
        assert_eq!(paths, vec!["report.mov"]);

        std::fs::remove_file(dir.path().join("report.mov"))?;
        let (_, paths) = next_change(&mut stream).await?;
        assert_eq!(paths, vec!["report.mov"]);

        handle.stop();
        assert!(handle.is_stopped());
        Ok(())
    }

    #[tokio::test]
    async fn sidecar_writes_are_not_published() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let events = EventBus::new();
        let mut stream = events.subscribe(None);
        let monitor = PackagesMonitor {
            label: "Watch playout".into(),
            ignore: None,
        };
        let handle = start_packages_monitor(events.clone(), "playout", dir.path(), &monitor)?;

        std::fs::write(dir.path().join("report.mov_metadata.json"), b"{}")?;
        std::fs::write(dir.path().join("clip.mov"), b"payload")?;
        let (_, paths) = next_change(&mut stream).await?;
        assert_eq!(paths, vec!["clip.mov"]);
        handle.stop();
        Ok(())
    }
}
