//! Filesystem helpers shared by folder-like handles.
//!
//! # Design
//! - `FolderAccess` is composed into the local-folder and file-share handles
//!   rather than inherited; the share handle re-roots it after drive preparation.
//! - Derived paths are deterministic from the artifact path: `<path>.pmtemp`
//!   for temporary writes and `<path>_metadata.json` for the stored record.
//! - Delayed removals live in a ledger file inside the container folder. Every
//!   ledger read-modify-write holds one process-wide async lock.
//! - Age-based cleanup walks the container on the blocking pool and never
//!   touches the ledger, sidecars or in-flight temporary files directly.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ferry_core::{
    AccessResult, CleanupCronjob, Cronjob, FileVersion, PackageContainerExpectation, PackageError,
    PackageResult, Reason, WorkOptions,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::handle::{PackageReadStream, PackageReader, PutPackageHandle, WriteCancellation};

/// Suffix of in-progress writes.
pub const TEMPORARY_SUFFIX: &str = ".pmtemp";
/// Suffix of metadata sidecars.
pub const METADATA_SUFFIX: &str = "_metadata.json";
/// Delayed-removal ledger kept in each container folder.
pub const REMOVAL_LEDGER: &str = "__removePackages.json";

static LEDGER_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Append `suffix` to the final path component.
#[must_use]
pub fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|since| i64::try_from(since.as_millis()).ok())
        .unwrap_or_default()
}

/// Delete `path`; a missing file is not an error. Returns whether a file was removed.
///
/// # Errors
///
/// Returns the classified IO error for anything other than a missing file.
pub async fn unlink_if_exists(path: &Path) -> PackageResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(PackageError::io("unlink", path, err)),
    }
}

/// Stat `path` into a size and modification-time fingerprint.
///
/// # Errors
///
/// Returns [`PackageError::NotFound`] when the file is absent.
pub async fn stat_version(path: &Path) -> PackageResult<FileVersion> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|err| PackageError::io("stat", path, err))?;
    Ok(FileVersion {
        file_size: Some(metadata.len()),
        modified_date: modified_millis(&metadata),
        ..FileVersion::default()
    })
}

fn modified_millis(metadata: &std::fs::Metadata) -> Option<i64> {
    let since = metadata.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(since.as_millis()).ok()
}

/// Kind of permission probed by [`check_access`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read permission.
    Read,
    /// Write permission.
    Write,
}

/// Probe `path` for `mode` permission without opening it.
///
/// # Errors
///
/// Returns the OS error when the path is absent or the permission is missing.
#[cfg(unix)]
pub fn check_access(path: &Path, mode: AccessMode) -> io::Result<()> {
    use nix::unistd::{AccessFlags, access};

    let flags = match mode {
        AccessMode::Read => AccessFlags::R_OK,
        AccessMode::Write => AccessFlags::W_OK,
    };
    access(path, flags).map_err(io::Error::from)
}

/// Probe `path` for `mode` permission without opening it.
///
/// # Errors
///
/// Returns the OS error when the path is absent or the permission is missing.
#[cfg(not(unix))]
pub fn check_access(path: &Path, mode: AccessMode) -> io::Result<()> {
    let metadata = std::fs::metadata(path)?;
    if mode == AccessMode::Write && metadata.permissions().readonly() {
        return Err(io::Error::from(io::ErrorKind::PermissionDenied));
    }
    Ok(())
}

/// Reason for a failed package read probe.
#[must_use]
pub fn read_access_reason(tech_prefix: &str, err: &io::Error) -> Reason {
    Reason::new("File doesn't exist", format!("{tech_prefix}: {err}"))
}

/// A container folder and, unless container-only, one package inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderAccess {
    folder: PathBuf,
    file_path: Option<String>,
    work_options: WorkOptions,
}

impl FolderAccess {
    /// Access to `file_path` in `folder`; `None` addresses the folder only.
    pub fn new(folder: impl Into<PathBuf>, file_path: Option<String>, work_options: WorkOptions) -> Self {
        Self {
            folder: folder.into(),
            file_path,
            work_options,
        }
    }

    /// Same package under a different folder root, e.g. a mapped drive letter.
    #[must_use]
    pub fn rooted_at(&self, folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            ..self.clone()
        }
    }

    /// Container folder.
    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Execution options in effect.
    #[must_use]
    pub const fn work_options(&self) -> WorkOptions {
        self.work_options
    }

    /// Package path relative to the folder.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InternalConfig`] for container-only access.
    pub fn file_path(&self) -> PackageResult<&str> {
        self.file_path
            .as_deref()
            .ok_or_else(|| PackageError::config("filePath", "is not set for container-only access", None))
    }

    /// Absolute package path.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InternalConfig`] for container-only access.
    pub fn full_path(&self) -> PackageResult<PathBuf> {
        Ok(self.folder.join(self.file_path()?))
    }

    /// Path written to while a temporary write is in progress.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InternalConfig`] for container-only access.
    pub fn temporary_path(&self) -> PackageResult<PathBuf> {
        Ok(suffixed(&self.full_path()?, TEMPORARY_SUFFIX))
    }

    /// Destination of `put_stream` under the configured write mode.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InternalConfig`] for container-only access.
    pub fn write_path(&self) -> PackageResult<PathBuf> {
        if self.work_options.use_temporary_file_path {
            self.temporary_path()
        } else {
            self.full_path()
        }
    }

    /// Sidecar holding the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InternalConfig`] for container-only access.
    pub fn metadata_path(&self) -> PackageResult<PathBuf> {
        Ok(suffixed(&self.full_path()?, METADATA_SUFFIX))
    }

    /// Probe read permission on the package, explaining failures with `tech_prefix`.
    pub fn check_package_read_access(&self, tech_prefix: &str) -> AccessResult {
        let path = self.full_path().map_err(|err| err.reason())?;
        check_access(&path, AccessMode::Read).map_err(|err| read_access_reason(tech_prefix, &err))
    }

    /// Open the package to detect locks and absence.
    pub async fn try_package_read(&self) -> AccessResult {
        let path = self.full_path().map_err(|err| err.reason())?;
        match fs::File::open(&path).await {
            Ok(_) => Ok(()),
            Err(err) => {
                let tech = err.to_string();
                let user = match PackageError::io("open", &path, err) {
                    PackageError::Busy { .. } => "Not able to read file (file is busy)",
                    PackageError::NotFound { .. } => "File does not exist",
                    _ => "Not able to read file",
                };
                Err(Reason::new(user, tech))
            }
        }
    }

    /// Probe the container folder for `mode` permission.
    pub fn check_container_access(&self, mode: AccessMode) -> AccessResult {
        check_access(&self.folder, mode).map_err(|err| {
            let user = match mode {
                AccessMode::Read => "Not able to read from container folder",
                AccessMode::Write => "Not able to write to container folder",
            };
            Reason::new(user, format!("{user}: {err}"))
        })
    }

    /// Fingerprint of the package on disk.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::NotFound`] when the package is absent.
    pub async fn read_version(&self) -> PackageResult<FileVersion> {
        stat_version(&self.full_path()?).await
    }

    /// Open the package for streaming reads.
    ///
    /// # Errors
    ///
    /// Returns the classified IO error when the package cannot be opened.
    pub async fn open_read(&self) -> PackageResult<PackageReadStream> {
        let path = self.full_path()?;
        let file = fs::File::open(&path)
            .await
            .map_err(|err| PackageError::io("open", &path, err))?;
        let size = file.metadata().await.ok().map(|metadata| metadata.len());
        Ok(PackageReadStream {
            reader: Box::new(file),
            size,
        })
    }

    /// Clear any pending removal, drop what is at the destination and start copying `source` there.
    ///
    /// # Errors
    ///
    /// Setup failures are returned here; copy failures come from the handle.
    pub async fn put_stream(&self, mut source: PackageReader) -> PackageResult<PutPackageHandle> {
        clear_package_removal(&self.folder, self.file_path()?).await?;
        let destination = self.write_path()?;
        unlink_if_exists(&destination).await?;

        let target = destination.display().to_string();
        Ok(PutPackageHandle::spawn(
            target,
            WriteCancellation::Abortable,
            async move {
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent)
                        .await
                        .map_err(|err| PackageError::io("create_dir", parent, err))?;
                }
                let mut file = fs::File::create(&destination)
                    .await
                    .map_err(|err| PackageError::io("create", &destination, err))?;
                let written = tokio::io::copy(&mut source, &mut file)
                    .await
                    .map_err(|err| PackageError::io("write", &destination, err))?;
                file.flush()
                    .await
                    .map_err(|err| PackageError::io("flush", &destination, err))?;
                debug!(path = %destination.display(), bytes = written, "package written");
                Ok(written)
            },
        ))
    }

    /// Move a temporary write into place; a no-op unless temporary paths are in use.
    ///
    /// # Errors
    ///
    /// Returns the classified IO error when the rename fails.
    pub async fn finalize(&self) -> PackageResult<()> {
        if !self.work_options.use_temporary_file_path {
            return Ok(());
        }
        let full = self.full_path()?;
        let temporary = self.temporary_path()?;
        unlink_if_exists(&full).await?;
        fs::rename(&temporary, &full)
            .await
            .map_err(|err| PackageError::io("rename", &temporary, err))
    }

    /// Stored record; `None` when the sidecar was never written.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Json`] for an unreadable sidecar.
    pub async fn fetch_metadata(&self) -> PackageResult<Option<Value>> {
        let path = self.metadata_path()?;
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|err| PackageError::json("fetch_metadata", path.display().to_string(), err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(PackageError::io("fetch_metadata", &path, err)),
        }
    }

    /// Replace the stored record.
    ///
    /// # Errors
    ///
    /// Returns the classified IO error when the sidecar cannot be written.
    pub async fn update_metadata(&self, metadata: &Value) -> PackageResult<()> {
        let path = self.metadata_path()?;
        let encoded = serde_json::to_vec_pretty(metadata)
            .map_err(|err| PackageError::json("update_metadata", path.display().to_string(), err))?;
        fs::write(&path, encoded)
            .await
            .map_err(|err| PackageError::io("update_metadata", &path, err))
    }

    /// Remove the stored record.
    ///
    /// # Errors
    ///
    /// Returns the classified IO error for anything but a missing sidecar.
    pub async fn remove_metadata(&self) -> PackageResult<()> {
        unlink_if_exists(&self.metadata_path()?).await.map(drop)
    }

    /// Delete the package and its record, or schedule removal when a delay is set.
    ///
    /// # Errors
    ///
    /// Returns the classified IO error or a ledger failure.
    pub async fn remove_package(&self) -> PackageResult<()> {
        let file_path = self.file_path()?;
        if let Some(delay) = self.work_options.remove_delay.filter(|delay| *delay > 0) {
            return delay_package_removal(&self.folder, file_path, delay).await;
        }
        self.remove_metadata().await?;
        let removed = unlink_if_exists(&self.full_path()?).await?;
        debug!(file_path, removed, "package removed");
        Ok(())
    }

    /// The package is in active use again; drop any pending removal.
    ///
    /// # Errors
    ///
    /// Returns a ledger failure.
    pub async fn package_is_in_place(&self) -> PackageResult<()> {
        clear_package_removal(&self.folder, self.file_path()?).await
    }
}

/// One pending removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayedRemoval {
    /// Package path relative to the container folder.
    pub file_path: String,
    /// Due time, milliseconds since the Unix epoch.
    pub remove_time: i64,
}

async fn read_ledger(path: &Path) -> PackageResult<Vec<DelayedRemoval>> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|err| PackageError::json("read_removal_ledger", path.display().to_string(), err)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(PackageError::io("read_removal_ledger", path, err)),
    }
}

async fn write_ledger(path: &Path, entries: &[DelayedRemoval]) -> PackageResult<()> {
    let encoded = serde_json::to_vec_pretty(entries)
        .map_err(|err| PackageError::json("write_removal_ledger", path.display().to_string(), err))?;
    fs::write(path, encoded)
        .await
        .map_err(|err| PackageError::io("write_removal_ledger", path, err))
}

/// Pending removals recorded for `folder`.
///
/// # Errors
///
/// Returns a ledger read failure.
pub async fn pending_removals(folder: &Path) -> PackageResult<Vec<DelayedRemoval>> {
    let _guard = LEDGER_LOCK.lock().await;
    read_ledger(&folder.join(REMOVAL_LEDGER)).await
}

/// Schedule `file_path` for removal `delay_ms` from now, replacing an earlier schedule.
///
/// # Errors
///
/// Returns a ledger read or write failure.
pub async fn delay_package_removal(folder: &Path, file_path: &str, delay_ms: u64) -> PackageResult<()> {
    let _guard = LEDGER_LOCK.lock().await;
    let ledger = folder.join(REMOVAL_LEDGER);
    let mut entries = read_ledger(&ledger).await?;
    let remove_time = now_millis().saturating_add(i64::try_from(delay_ms).unwrap_or(i64::MAX));
    entries.retain(|entry| entry.file_path != file_path);
    entries.push(DelayedRemoval {
        file_path: file_path.to_string(),
        remove_time,
    });
    write_ledger(&ledger, &entries).await?;
    info!(file_path, delay_ms, "package removal scheduled");
    Ok(())
}

/// Cancel a pending removal of `file_path`; nothing is written when none is pending.
///
/// # Errors
///
/// Returns a ledger read or write failure.
pub async fn clear_package_removal(folder: &Path, file_path: &str) -> PackageResult<()> {
    let _guard = LEDGER_LOCK.lock().await;
    let ledger = folder.join(REMOVAL_LEDGER);
    let mut entries = read_ledger(&ledger).await?;
    let before = entries.len();
    entries.retain(|entry| entry.file_path != file_path);
    if entries.len() == before {
        return Ok(());
    }
    write_ledger(&ledger, &entries).await?;
    debug!(file_path, "pending package removal cleared");
    Ok(())
}

/// Delete every package whose removal is due, with its sidecar. Returns the removed paths.
///
/// # Errors
///
/// Returns the first deletion or ledger failure; packages removed before it
/// are dropped from the ledger.
pub async fn remove_due_packages(folder: &Path) -> PackageResult<Vec<String>> {
    let _guard = LEDGER_LOCK.lock().await;
    let ledger = folder.join(REMOVAL_LEDGER);
    let entries = read_ledger(&ledger).await?;
    let now = now_millis();

    let mut remaining = Vec::with_capacity(entries.len());
    let mut removed = Vec::new();
    let mut failure = None;
    for entry in entries {
        if failure.is_some() || entry.remove_time > now {
            remaining.push(entry);
            continue;
        }
        let full = folder.join(&entry.file_path);
        let outcome = async {
            unlink_if_exists(&suffixed(&full, METADATA_SUFFIX)).await?;
            unlink_if_exists(&full).await
        }
        .await;
        match outcome {
            Ok(_) => removed.push(entry.file_path),
            Err(err) => {
                failure = Some(err);
                remaining.push(entry);
            }
        }
    }

    if !removed.is_empty() {
        write_ledger(&ledger, &remaining).await?;
        info!(count = removed.len(), folder = %folder.display(), "due packages removed");
    }
    failure.map_or(Ok(removed), Err)
}

fn is_bookkeeping(name: &str) -> bool {
    name == REMOVAL_LEDGER || name.ends_with(METADATA_SUFFIX) || name.ends_with(TEMPORARY_SUFFIX)
}

/// Delete artifacts under `folder` last modified more than `max_age` ago, with their sidecars.
/// Returns the removed paths relative to `folder`.
///
/// # Errors
///
/// Returns the first walk or deletion failure.
pub async fn cleanup_old_files(folder: &Path, max_age: Duration) -> PackageResult<Vec<String>> {
    let root = folder.to_path_buf();
    let removed = tokio::task::spawn_blocking(move || cleanup_old_files_blocking(&root, max_age))
        .await
        .map_err(|join| PackageError::Io {
            operation: "cleanup_old_files",
            path: folder.to_path_buf(),
            source: io::Error::other(join.to_string()),
        })??;
    if !removed.is_empty() {
        info!(count = removed.len(), folder = %folder.display(), "old files removed");
    }
    Ok(removed)
}

fn cleanup_old_files_blocking(root: &Path, max_age: Duration) -> PackageResult<Vec<String>> {
    let cutoff = SystemTime::now().checked_sub(max_age).unwrap_or(UNIX_EPOCH);
    let mut removed = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            PackageError::io("cleanup_walk", path, io::Error::from(err))
        })?;
        if !entry.file_type().is_file() || is_bookkeeping(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        let modified = entry
            .metadata()
            .ok()
            .and_then(|metadata| metadata.modified().ok());
        if modified.is_none_or(|modified| modified >= cutoff) {
            continue;
        }
        std::fs::remove_file(path).map_err(|err| PackageError::io("cleanup_remove", path, err))?;
        let sidecar = suffixed(path, METADATA_SUFFIX);
        match std::fs::remove_file(&sidecar) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(PackageError::io("cleanup_remove", sidecar, err)),
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        removed.push(relative.to_string_lossy().into_owned());
    }
    Ok(removed)
}

/// Run the container's cron jobs against `access.folder()`.
///
/// Callers check container access first.
pub async fn run_cron_jobs(access: &FolderAccess, container: &PackageContainerExpectation) -> AccessResult {
    for job in container.cronjobs.jobs() {
        match job {
            Cronjob::Interval(_) => {}
            Cronjob::Cleanup(cleanup) => run_cleanup(access.folder(), cleanup).await?,
        }
    }
    Ok(())
}

async fn run_cleanup(folder: &Path, cleanup: &CleanupCronjob) -> AccessResult {
    remove_due_packages(folder)
        .await
        .map_err(|err| err.reason().prefixed("Not able to remove due packages"))?;
    if let Some(age) = cleanup.clean_file_age.filter(|age| *age > 0) {
        cleanup_old_files(folder, Duration::from_secs(age))
            .await
            .map_err(|err| err.reason().prefixed("Not able to clean up old files"))?;
    }
    Ok(())
}
