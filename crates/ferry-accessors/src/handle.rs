//! The accessor capability contract and the closed set of handle types.
//!
//! # Design
//! - `PackageAccessor` is the capability interface every backend implements;
//!   check operations return `AccessResult` and never fail with an error.
//! - `AccessorHandle` is a closed enum so adding a backend is visible at every
//!   `match` site. It derefs to the trait for uniform use.
//! - Writes run on a spawned task. `PutPackageHandle::finished` yields the
//!   result exactly once and `cancel` is honoured only where the backend can
//!   actually abort.

use std::ops::Deref;

use async_trait::async_trait;
use ferry_core::{
    AccessResult, AccessorOnPackage, AccessorType, ChecksumType, ClipContent, ClipVersion, FileContent,
    FileVersion, MonitorSet, PackageContainerExpectation, PackageError, PackageResult, Reason,
    WorkOptions,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::context::AccessorContext;
use crate::core_package_info::CorePackageInfoHandle;
use crate::file_share::FileShareHandle;
use crate::http::HttpHandle;
use crate::local_folder::LocalFolderHandle;
use crate::tape::TapeHandle;

/// Byte source handed to [`PackageAccessor::put_package_stream`].
pub type PackageReader = Box<dyn AsyncRead + Send + Unpin>;

/// Which package a handle addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleContent {
    /// A file inside the container.
    File(FileContent),
    /// A clip on a tape archive.
    Clip(ClipContent),
    /// The container itself, for cron jobs and monitors.
    ContainerOnly,
}

/// Observed version of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageVersion {
    /// File fingerprint.
    File(FileVersion),
    /// Tape clip version.
    Clip(ClipVersion),
}

impl PackageVersion {
    /// File fingerprint, when this is a file.
    #[must_use]
    pub const fn as_file(&self) -> Option<&FileVersion> {
        match self {
            Self::File(version) => Some(version),
            Self::Clip(_) => None,
        }
    }

    /// Clip version, when this is a clip.
    #[must_use]
    pub const fn as_clip(&self) -> Option<&ClipVersion> {
        match self {
            Self::Clip(version) => Some(version),
            Self::File(_) => None,
        }
    }
}

/// Open read stream with its size when the backend knows it.
pub struct PackageReadStream {
    /// Package bytes.
    pub reader: PackageReader,
    /// Total length in bytes.
    pub size: Option<u64>,
}

impl std::fmt::Debug for PackageReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageReadStream")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Clip-level transfer description, read from a source archive and handed to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReadInfo {
    /// Gateway serving the source clip.
    pub gateway_url: String,
    /// Server pool holding the source clip.
    pub server_id: Option<u32>,
    /// Source clip id.
    pub clip_id: u64,
    /// Source clip version.
    pub version: ClipVersion,
}

/// Whether an in-flight write can be stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCancellation {
    /// The copy task is aborted; partial output is replaced by the next write.
    Abortable,
    /// The backend runs the transfer remotely and cannot stop it once started.
    Unsupported,
}

/// Result and cancellation handle of a started write.
#[derive(Debug)]
pub struct PutPackageHandle {
    task: JoinHandle<PackageResult<u64>>,
    cancellation: WriteCancellation,
    target: String,
}

impl PutPackageHandle {
    pub(crate) fn spawn<F>(target: impl Into<String>, cancellation: WriteCancellation, write: F) -> Self
    where
        F: Future<Output = PackageResult<u64>> + Send + 'static,
    {
        Self {
            task: tokio::spawn(write),
            cancellation,
            target: target.into(),
        }
    }

    /// Cancellation capability of the backend that started the write.
    #[must_use]
    pub const fn cancellation(&self) -> WriteCancellation {
        self.cancellation
    }

    /// Where the bytes are going.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Stop the write. Returns `false` when the backend cannot abort it.
    pub fn cancel(&self) -> bool {
        match self.cancellation {
            WriteCancellation::Abortable => {
                self.task.abort();
                true
            }
            WriteCancellation::Unsupported => false,
        }
    }

    /// Wait for the write; resolves with the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns the write's own error, or [`PackageError::Cancelled`] when it was aborted.
    pub async fn finished(self) -> PackageResult<u64> {
        let joined = self.task.await;
        settle(&self.target, joined)
    }

    /// Wait for the write, stopping it when `cancel` fires first.
    ///
    /// A write that cannot be aborted keeps running in the background; the
    /// caller still gets [`PackageError::Cancelled`].
    ///
    /// # Errors
    ///
    /// See [`PutPackageHandle::finished`].
    pub async fn finished_unless(self, cancel: &CancellationToken) -> PackageResult<u64> {
        let Self {
            mut task,
            cancellation,
            target,
        } = self;
        let abort = task.abort_handle();
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                match cancellation {
                    WriteCancellation::Abortable => abort.abort(),
                    WriteCancellation::Unsupported => {
                        warn!(destination = %target, "write cannot be aborted, leaving it to finish");
                    }
                }
                Err(PackageError::Cancelled {
                    operation: "put_package_stream",
                })
            }
            joined = &mut task => settle(&target, joined),
        }
    }
}

fn settle(target: &str, joined: Result<PackageResult<u64>, JoinError>) -> PackageResult<u64> {
    match joined {
        Ok(result) => result,
        Err(join) if join.is_cancelled() => Err(PackageError::Cancelled {
            operation: "put_package_stream",
        }),
        Err(join) => Err(PackageError::Io {
            operation: "put_package_stream",
            path: target.into(),
            source: std::io::Error::other(join.to_string()),
        }),
    }
}

/// Stream `reader` through SHA-256 and return the lowercase hex digest.
///
/// # Errors
///
/// Returns the read error that interrupted the stream.
pub async fn sha256_hex(mut reader: PackageReader) -> PackageResult<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buf)
            .await
            .map_err(|err| PackageError::io("get_package_checksum", "", err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Capability contract implemented once per backend.
#[async_trait]
pub trait PackageAccessor: Send + Sync {
    /// Backend this handle talks to.
    fn accessor_type(&self) -> AccessorType;

    /// Fail fast unless the accessor may be read and is fully described.
    fn check_handle_read(&self) -> AccessResult;

    /// Fail fast unless the accessor may be written and is fully described.
    fn check_handle_write(&self) -> AccessResult;

    /// Probe that the package exists and is readable.
    async fn check_package_read_access(&self) -> AccessResult;

    /// Open the package for reading to detect locks held by other processes.
    async fn try_package_read(&self) -> AccessResult;

    /// Probe that the container accepts writes.
    async fn check_package_container_write_access(&self) -> AccessResult;

    /// Observed version of the package.
    async fn get_package_actual_version(&self) -> PackageResult<PackageVersion>;

    /// Delete the package, or schedule its removal when a delay is configured.
    async fn remove_package(&self) -> PackageResult<()>;

    /// Open the package for streaming reads.
    async fn get_package_read_stream(&self) -> PackageResult<PackageReadStream>;

    /// Hex digest of the package bytes; `None` for algorithms that are not computed locally.
    async fn get_package_checksum(&self, kind: ChecksumType) -> PackageResult<Option<String>> {
        if kind != ChecksumType::Sha256 {
            return Ok(None);
        }
        let stream = self.get_package_read_stream().await?;
        sha256_hex(stream.reader).await.map(Some)
    }

    /// Start streaming `source` into the package.
    async fn put_package_stream(&self, source: PackageReader) -> PackageResult<PutPackageHandle>;

    /// Describe the package for a clip-level transfer.
    async fn get_package_read_info(&self) -> PackageResult<PackageReadInfo> {
        Err(PackageError::unsupported(
            "get_package_read_info",
            self.accessor_type(),
        ))
    }

    /// Start a clip-level transfer from `info` into this package.
    async fn put_package_info(&self, info: PackageReadInfo) -> PackageResult<PutPackageHandle> {
        let _ = info;
        Err(PackageError::unsupported(
            "put_package_info",
            self.accessor_type(),
        ))
    }

    /// Move a completed temporary write into place.
    async fn finalize_package(&self) -> PackageResult<()>;

    /// Stored record next to the package; `None` when it was never written.
    async fn fetch_metadata(&self) -> PackageResult<Option<Value>>;

    /// Replace the stored record.
    async fn update_metadata(&self, metadata: &Value) -> PackageResult<()>;

    /// Remove the stored record; removing an absent record succeeds.
    async fn remove_metadata(&self) -> PackageResult<()>;

    /// Run the container's cron jobs after checking container access.
    async fn run_cron_job(&self, container: &PackageContainerExpectation) -> AccessResult;

    /// Start the container's monitors.
    async fn setup_package_container_monitors(
        &self,
        container: &PackageContainerExpectation,
    ) -> Result<MonitorSet, Reason> {
        let _ = container;
        Err(Reason::new(
            "Monitors not supported",
            format!("Monitors not supported on {} accessors", self.accessor_type()),
        ))
    }

    /// The package is in use; cancel any pending delayed removal.
    async fn package_is_in_place(&self) -> PackageResult<()> {
        Ok(())
    }
}

/// A validated handle for one accessor, dispatching to its backend.
#[derive(Debug)]
pub enum AccessorHandle {
    /// `LOCAL_FOLDER` and `MAPPED_DRIVE`.
    LocalFolder(LocalFolderHandle),
    /// `FILE_SHARE`.
    FileShare(FileShareHandle),
    /// `HTTP`.
    Http(HttpHandle),
    /// `CORE_PACKAGE_INFO`.
    CorePackageInfo(CorePackageInfoHandle),
    /// `TAPE`.
    Tape(TapeHandle),
}

impl AccessorHandle {
    /// Build the handle for `accessor`, validating `content` against its backend.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InternalConfig`] when the content does not fit the
    /// backend or a required path is missing.
    pub fn new(
        ctx: &AccessorContext,
        accessor_id: &str,
        accessor: &AccessorOnPackage,
        content: HandleContent,
        work_options: WorkOptions,
    ) -> PackageResult<Self> {
        let accessor = accessor.clone();
        Ok(match accessor.accessor_type {
            AccessorType::LocalFolder | AccessorType::MappedDrive => Self::LocalFolder(
                LocalFolderHandle::new(ctx, accessor_id, accessor, &content, work_options)?,
            ),
            AccessorType::FileShare => Self::FileShare(FileShareHandle::new(
                ctx,
                accessor_id,
                accessor,
                &content,
                work_options,
            )?),
            AccessorType::Http => Self::Http(HttpHandle::new(
                ctx,
                accessor_id,
                accessor,
                &content,
                work_options,
            )?),
            AccessorType::CorePackageInfo => {
                Self::CorePackageInfo(CorePackageInfoHandle::new(ctx, accessor_id, accessor))
            }
            AccessorType::Tape => Self::Tape(TapeHandle::new(ctx, accessor_id, accessor, &content)?),
        })
    }

    /// The record-store handle, when this is a `CORE_PACKAGE_INFO` accessor.
    #[must_use]
    pub const fn as_core_package_info(&self) -> Option<&CorePackageInfoHandle> {
        match self {
            Self::CorePackageInfo(handle) => Some(handle),
            Self::LocalFolder(_) | Self::FileShare(_) | Self::Http(_) | Self::Tape(_) => None,
        }
    }

    /// Local filesystem path of the package, for tools that need a path rather than a stream.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::UnsupportedOperation`] for backends without a
    /// filesystem path, and the preparation error for shares that cannot be reached.
    pub async fn local_package_path(&self) -> PackageResult<std::path::PathBuf> {
        match self {
            Self::LocalFolder(handle) => handle.full_path(),
            Self::FileShare(handle) => handle.prepared_full_path().await,
            Self::Http(_) | Self::CorePackageInfo(_) | Self::Tape(_) => Err(
                PackageError::unsupported("local_package_path", self.accessor_type()),
            ),
        }
    }
}

impl Deref for AccessorHandle {
    type Target = dyn PackageAccessor;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::LocalFolder(handle) => handle,
            Self::FileShare(handle) => handle,
            Self::Http(handle) => handle,
            Self::CorePackageInfo(handle) => handle,
            Self::Tape(handle) => handle,
        }
    }
}

/// Reason for an accessor whose type does not match the handle built for it.
pub(crate) fn wrong_type(handle: &str, expected: &str, accessor: &AccessorOnPackage) -> Reason {
    Reason::new(
        "There is an internal issue in Package Manager",
        format!(
            "{handle} Accessor type is not {expected} (\"{}\")!",
            accessor.accessor_type
        ),
    )
}

/// Reason for a capability flag that forbids the operation.
pub(crate) fn flag_check(allowed: bool, read: bool) -> AccessResult {
    if allowed {
        return Ok(());
    }
    let text = if read {
        "Not allowed to read"
    } else {
        "Not allowed to write"
    };
    Err(Reason::new(text, text))
}

/// File path of a file-like handle: the accessor's own path wins over the content.
pub(crate) fn resolve_file_path(
    accessor: &AccessorOnPackage,
    content: &HandleContent,
) -> PackageResult<Option<String>> {
    match content {
        HandleContent::ContainerOnly => Ok(None),
        HandleContent::File(file) => accessor
            .file_path
            .clone()
            .filter(|path| !path.is_empty())
            .or_else(|| Some(file.file_path.clone()).filter(|path| !path.is_empty()))
            .map(Some)
            .ok_or_else(|| PackageError::config("filePath", "is not set", None)),
        HandleContent::Clip(_) => Err(PackageError::config(
            "content",
            "is not file content",
            Some(accessor.accessor_type.to_string()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_config::LocationConfig;
    use ferry_events::EventBus;

    fn ctx() -> AccessorContext {
        AccessorContext::new(LocationConfig::default(), EventBus::new())
    }

    #[tokio::test]
    async fn sha256_of_a_stream_is_lowercase_hex() -> anyhow::Result<()> {
        let digest = sha256_hex(Box::new(&b"payload"[..])).await?;
        assert_eq!(
            digest,
            "239f59ed55e737c77147cf55ad0c1b030b6d7ee748a7426952f9b852d5a935e5"
        );
        Ok(())
    }

    #[test]
    fn mapped_drives_use_the_local_folder_handle() -> anyhow::Result<()> {
        let accessor = AccessorOnPackage::mapped_drive("studio-pc", "X:\\").readable();
        let handle = AccessorHandle::new(
            &ctx(),
            "mapped",
            &accessor,
            HandleContent::File(FileContent::new("report.mov")),
            WorkOptions::default(),
        )?;
        assert!(matches!(handle, AccessorHandle::LocalFolder(_)));
        assert_eq!(handle.accessor_type(), AccessorType::MappedDrive);
        Ok(())
    }

    #[test]
    fn missing_file_path_is_a_config_error() {
        let accessor = AccessorOnPackage::local_folder("studio-pc", "/media").readable();
        let result = AccessorHandle::new(
            &ctx(),
            "local",
            &accessor,
            HandleContent::File(FileContent::default()),
            WorkOptions::default(),
        );
        assert!(matches!(
            result,
            Err(PackageError::InternalConfig {
                field: "filePath",
                ..
            })
        ));
    }

    #[test]
    fn accessor_file_path_overrides_content() -> anyhow::Result<()> {
        let mut accessor = AccessorOnPackage::local_folder("studio-pc", "/media");
        accessor.file_path = Some("fixed.mov".into());
        let resolved = resolve_file_path(
            &accessor,
            &HandleContent::File(FileContent::new("report.mov")),
        )?;
        assert_eq!(resolved.as_deref(), Some("fixed.mov"));
        assert_eq!(resolve_file_path(&accessor, &HandleContent::ContainerOnly)?, None);
        Ok(())
    }

    #[test]
    fn flag_checks_explain_direction() {
        assert!(flag_check(true, true).is_ok());
        let read = flag_check(false, true).err().map(|reason| reason.user);
        let write = flag_check(false, false).err().map(|reason| reason.user);
        assert_eq!(read.as_deref(), Some("Not allowed to read"));
        assert_eq!(write.as_deref(), Some("Not allowed to write"));
    }

    #[tokio::test]
    async fn unabortable_writes_ignore_cancel() -> anyhow::Result<()> {
        let handle = PutPackageHandle::spawn("clip 7", WriteCancellation::Unsupported, async {
            Ok(42)
        });
        assert!(!handle.cancel());
        assert_eq!(handle.finished().await?, 42);
        Ok(())
    }

    #[tokio::test]
    async fn aborted_writes_report_cancellation() {
        let handle = PutPackageHandle::spawn("/media/report.mov", WriteCancellation::Abortable, async {
            std::future::pending::<()>().await;
            Ok(0)
        });
        assert!(handle.cancel());
        assert!(matches!(
            handle.finished().await,
            Err(PackageError::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn cancellation_token_stops_waiting() {
        let cancel = CancellationToken::new();
        let handle = PutPackageHandle::spawn("/media/report.mov", WriteCancellation::Abortable, async {
            std::future::pending::<()>().await;
            Ok(0)
        });
        cancel.cancel();
        assert!(matches!(
            handle.finished_unless(&cancel).await,
            Err(PackageError::Cancelled { .. })
        ));
    }
}
