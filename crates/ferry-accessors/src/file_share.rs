//! Network shares addressed by UNC path, optionally through a mapped drive letter.
//!
//! # Design
//! - Every operation prepares the share first. With a drive-letter manager the
//!   folder root becomes the mapped letter; without one the UNC path is used as is.
//! - A permission failure on a credentialed share triggers one forced remount and
//!   a single retry of the read probe before the failure is reported.
//! - Writes are local copy tasks and can be aborted like local-folder writes.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use ferry_core::{
    AccessResult, AccessorOnPackage, AccessorType, MonitorSet, PackageContainerExpectation,
    PackageError, PackageResult, Reason, WorkOptions,
};
use ferry_drives::{DriveLetterManager, PrepareRequest};
use ferry_events::EventBus;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::AccessorContext;
use crate::file_support::{
    AccessMode, FolderAccess, check_access, read_access_reason, run_cron_jobs,
};
use crate::handle::{
    HandleContent, PackageAccessor, PackageReadStream, PackageReader, PackageVersion,
    PutPackageHandle, flag_check, resolve_file_path, wrong_type,
};
use crate::monitor::setup_folder_monitors;

const READ_PROBE_PREFIX: &str = "Not able to read file";

/// Handle for `FILE_SHARE` accessors.
#[derive(Debug)]
pub struct FileShareHandle {
    accessor_id: String,
    accessor: AccessorOnPackage,
    access: FolderAccess,
    drives: Option<DriveLetterManager>,
    events: EventBus,
}

impl FileShareHandle {
    pub(crate) fn new(
        ctx: &AccessorContext,
        accessor_id: &str,
        accessor: AccessorOnPackage,
        content: &HandleContent,
        work_options: WorkOptions,
    ) -> PackageResult<Self> {
        let file_path = resolve_file_path(&accessor, content)?;
        let folder = accessor.folder_path.clone().unwrap_or_default();
        Ok(Self {
            accessor_id: accessor_id.to_string(),
            access: FolderAccess::new(folder, file_path, work_options),
            accessor,
            drives: ctx.drives().cloned(),
            events: ctx.events().clone(),
        })
    }

    /// Accessor id within its container.
    #[must_use]
    pub fn accessor_id(&self) -> &str {
        &self.accessor_id
    }

    /// Package path after preparing the share.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::Drive`] when the share cannot be prepared.
    pub async fn prepared_full_path(&self) -> PackageResult<PathBuf> {
        self.prepare(false).await?.full_path()
    }

    /// Make the share reachable and return folder access rooted where it can be used.
    async fn prepare(&self, force_remount: bool) -> PackageResult<FolderAccess> {
        let Some(drives) = &self.drives else {
            return Ok(self.access.clone());
        };
        let folder_path = self.accessor.folder_path.as_deref().unwrap_or_default();
        let request = PrepareRequest {
            user_name: self.accessor.user_name.as_deref(),
            password: self.accessor.password.as_deref(),
            force_remount,
            disable_drive_mapping: self.accessor.disable_drive_mapping,
            ..PrepareRequest::new(folder_path)
        };
        let prepared = drives
            .prepare_access(request)
            .await
            .map_err(|source| PackageError::Drive {
                folder: folder_path.to_string(),
                source: Box::new(source),
            })?;
        Ok(self.access.rooted_at(prepared.root()))
    }

    async fn prepared(&self) -> Result<FolderAccess, Reason> {
        self.prepare(false).await.map_err(|err| err.reason())
    }

    fn check_handle_basic(&self) -> AccessResult {
        if self.accessor.accessor_type != AccessorType::FileShare {
            return Err(wrong_type("FileShare", "FILE_SHARE", &self.accessor));
        }
        if self.accessor.folder_path.as_deref().is_none_or(str::is_empty) {
            return Err(Reason::plain("Folder path not set"));
        }
        Ok(())
    }
}

fn probe_read(access: &FolderAccess) -> Result<(), ReadProbe> {
    let path = access.full_path().map_err(|err| ReadProbe::Config(err.reason()))?;
    check_access(&path, AccessMode::Read).map_err(ReadProbe::Os)
}

enum ReadProbe {
    Config(Reason),
    Os(io::Error),
}

impl ReadProbe {
    fn into_reason(self) -> Reason {
        match self {
            Self::Config(reason) => reason,
            Self::Os(err) => read_access_reason(READ_PROBE_PREFIX, &err),
        }
    }
}

#[async_trait]
impl PackageAccessor for FileShareHandle {
    fn accessor_type(&self) -> AccessorType {
        AccessorType::FileShare
    }

    fn check_handle_read(&self) -> AccessResult {
        flag_check(self.accessor.allow_read, true)?;
        self.check_handle_basic()
    }

    fn check_handle_write(&self) -> AccessResult {
        flag_check(self.accessor.allow_write, false)?;
        self.check_handle_basic()
    }

    async fn check_package_read_access(&self) -> AccessResult {
        let access = self.prepared().await?;
        match probe_read(&access) {
            Ok(()) => Ok(()),
            Err(ReadProbe::Os(err))
                if err.kind() == io::ErrorKind::PermissionDenied
                    && self.accessor.user_name.is_some() =>
            {
                warn!(
                    accessor_id = %self.accessor_id,
                    error = %err,
                    "share read denied; resetting access and retrying"
                );
                let access = self
                    .prepare(true)
                    .await
                    .map_err(|err| err.reason())?;
                probe_read(&access).map_err(ReadProbe::into_reason)
            }
            Err(issue) => Err(issue.into_reason()),
        }
    }

    async fn try_package_read(&self) -> AccessResult {
        self.prepared().await?.try_package_read().await
    }

    async fn check_package_container_write_access(&self) -> AccessResult {
        self.prepared()
            .await?
            .check_container_access(AccessMode::Write)
    }

    async fn get_package_actual_version(&self) -> PackageResult<PackageVersion> {
        self.prepare(false)
            .await?
            .read_version()
            .await
            .map(PackageVersion::File)
    }

    async fn remove_package(&self) -> PackageResult<()> {
        self.prepare(false).await?.remove_package().await
    }

    async fn get_package_read_stream(&self) -> PackageResult<PackageReadStream> {
        self.prepare(false).await?.open_read().await
    }

    async fn put_package_stream(&self, source: PackageReader) -> PackageResult<PutPackageHandle> {
        self.prepare(false).await?.put_stream(source).await
    }

    async fn finalize_package(&self) -> PackageResult<()> {
        self.prepare(false).await?.finalize().await
    }

    async fn fetch_metadata(&self) -> PackageResult<Option<Value>> {
        self.prepare(false).await?.fetch_metadata().await
    }

    async fn update_metadata(&self, metadata: &Value) -> PackageResult<()> {
        self.prepare(false).await?.update_metadata(metadata).await
    }

    async fn remove_metadata(&self) -> PackageResult<()> {
        self.prepare(false).await?.remove_metadata().await
    }

    async fn run_cron_job(&self, container: &PackageContainerExpectation) -> AccessResult {
        let access = self.prepared().await?;
        access.check_container_access(AccessMode::Read)?;
        if self.accessor.allow_write {
            access.check_container_access(AccessMode::Write)?;
        }
        debug!(container_id = %container.id, accessor_id = %self.accessor_id, "running cron jobs");
        run_cron_jobs(&access, container).await
    }

    async fn setup_package_container_monitors(
        &self,
        container: &PackageContainerExpectation,
    ) -> Result<MonitorSet, Reason> {
        let access = self.prepared().await?;
        setup_folder_monitors(&self.events, container, access.folder())
    }

    async fn package_is_in_place(&self) -> PackageResult<()> {
        self.prepare(false).await?.package_is_in_place().await
    }
}
