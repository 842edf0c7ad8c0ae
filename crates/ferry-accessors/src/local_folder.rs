//! Folders on the worker's own machine, including already-mapped drive roots.

use std::path::PathBuf;

use async_trait::async_trait;
use ferry_core::{
    AccessResult, AccessorOnPackage, AccessorType, MonitorSet, PackageContainerExpectation,
    PackageResult, Reason, WorkOptions,
};
use ferry_events::EventBus;
use serde_json::Value;
use tracing::debug;

use crate::context::AccessorContext;
use crate::file_support::{AccessMode, FolderAccess, run_cron_jobs};
use crate::handle::{
    HandleContent, PackageAccessor, PackageReadStream, PackageReader, PackageVersion,
    PutPackageHandle, flag_check, resolve_file_path, wrong_type,
};
use crate::monitor::setup_folder_monitors;

/// Handle for `LOCAL_FOLDER` and `MAPPED_DRIVE` accessors.
#[derive(Debug)]
pub struct LocalFolderHandle {
    accessor_id: String,
    accessor: AccessorOnPackage,
    access: FolderAccess,
    events: EventBus,
}

impl LocalFolderHandle {
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
            events: ctx.events().clone(),
        })
    }

    /// Accessor id within its container.
    #[must_use]
    pub fn accessor_id(&self) -> &str {
        &self.accessor_id
    }

    /// Absolute path of the package.
    ///
    /// # Errors
    ///
    /// Fails for container-only handles.
    pub fn full_path(&self) -> PackageResult<PathBuf> {
        self.access.full_path()
    }

    fn check_handle_basic(&self) -> AccessResult {
        if !matches!(
            self.accessor.accessor_type,
            AccessorType::LocalFolder | AccessorType::MappedDrive
        ) {
            return Err(wrong_type("LocalFolder", "LOCAL_FOLDER", &self.accessor));
        }
        if self.accessor.folder_path.as_deref().is_none_or(str::is_empty) {
            return Err(Reason::plain("Folder path not set"));
        }
        Ok(())
    }
}

#[async_trait]
impl PackageAccessor for LocalFolderHandle {
    fn accessor_type(&self) -> AccessorType {
        self.accessor.accessor_type
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
        self.access
            .check_package_read_access("Not able to access file")
    }

    async fn try_package_read(&self) -> AccessResult {
        self.access.try_package_read().await
    }

    async fn check_package_container_write_access(&self) -> AccessResult {
        self.access.check_container_access(AccessMode::Write)
    }

    async fn get_package_actual_version(&self) -> PackageResult<PackageVersion> {
        self.access.read_version().await.map(PackageVersion::File)
    }

    async fn remove_package(&self) -> PackageResult<()> {
        self.access.remove_package().await
    }

    async fn get_package_read_stream(&self) -> PackageResult<PackageReadStream> {
        self.access.open_read().await
    }

    async fn put_package_stream(&self, source: PackageReader) -> PackageResult<PutPackageHandle> {
        self.access.put_stream(source).await
    }

    async fn finalize_package(&self) -> PackageResult<()> {
        self.access.finalize().await
    }

    async fn fetch_metadata(&self) -> PackageResult<Option<Value>> {
        self.access.fetch_metadata().await
    }

    async fn update_metadata(&self, metadata: &Value) -> PackageResult<()> {
        self.access.update_metadata(metadata).await
    }

    async fn remove_metadata(&self) -> PackageResult<()> {
        self.access.remove_metadata().await
    }

    async fn run_cron_job(&self, container: &PackageContainerExpectation) -> AccessResult {
        self.access.check_container_access(AccessMode::Read)?;
        if self.accessor.allow_write {
            self.access.check_container_access(AccessMode::Write)?;
        }
        debug!(container_id = %container.id, accessor_id = %self.accessor_id, "running cron jobs");
        run_cron_jobs(&self.access, container).await
    }

    async fn setup_package_container_monitors(
        &self,
        container: &PackageContainerExpectation,
    ) -> Result<MonitorSet, Reason> {
        setup_folder_monitors(&self.events, container, self.access.folder())
    }

    async fn package_is_in_place(&self) -> PackageResult<()> {
        self.access.package_is_in_place().await
    }
}
