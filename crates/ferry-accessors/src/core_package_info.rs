//! The remote record store that receives media scan results.
//!
//! The handle only validates capability flags; records are addressed by
//! [`PackageInfoKey`] and never touch a filesystem, so every file-shaped
//! operation is unsupported.

use std::sync::Arc;

use async_trait::async_trait;
use ferry_core::{
    AccessResult, AccessorOnPackage, AccessorType, PackageContainerExpectation, PackageError,
    PackageInfoKey, PackageInfoStore, PackageResult, Reason,
};
use serde_json::Value;

use crate::context::AccessorContext;
use crate::handle::{
    PackageAccessor, PackageReadStream, PackageReader, PackageVersion, PutPackageHandle,
    flag_check, wrong_type,
};

/// Handle for `CORE_PACKAGE_INFO` accessors.
pub struct CorePackageInfoHandle {
    accessor_id: String,
    accessor: AccessorOnPackage,
    store: Option<Arc<dyn PackageInfoStore>>,
}

impl std::fmt::Debug for CorePackageInfoHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorePackageInfoHandle")
            .field("accessor_id", &self.accessor_id)
            .field("store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl CorePackageInfoHandle {
    pub(crate) fn new(
        ctx: &AccessorContext,
        accessor_id: &str,
        accessor: AccessorOnPackage,
    ) -> Self {
        Self {
            accessor_id: accessor_id.to_string(),
            accessor,
            store: ctx.package_info(),
        }
    }

    fn store(&self) -> PackageResult<&dyn PackageInfoStore> {
        self.store
            .as_deref()
            .ok_or_else(|| PackageError::config("packageInfoStore", "is not configured", None))
    }

    /// Hash stored with the record for `key`.
    ///
    /// # Errors
    ///
    /// Fails when no store is configured or the store cannot be reached.
    pub async fn fetch_package_info_hash(&self, key: &PackageInfoKey) -> PackageResult<Option<String>> {
        self.store()?.fetch_package_info_hash(key).await
    }

    /// Store or replace the record for `key`.
    ///
    /// # Errors
    ///
    /// Fails when no store is configured or the store rejects the record.
    pub async fn store_package_info(
        &self,
        key: &PackageInfoKey,
        hash: &str,
        payload: Value,
    ) -> PackageResult<()> {
        self.store()?.store_package_info(key, hash, payload).await
    }

    /// Remove the record for `key`.
    ///
    /// # Errors
    ///
    /// Fails when no store is configured or the store cannot be reached.
    pub async fn remove_package_info(&self, key: &PackageInfoKey) -> PackageResult<()> {
        self.store()?.remove_package_info(key).await
    }

    fn check_handle_basic(&self) -> AccessResult {
        if self.accessor.accessor_type != AccessorType::CorePackageInfo {
            return Err(wrong_type("CorePackageInfo", "CORE_PACKAGE_INFO", &self.accessor));
        }
        Ok(())
    }

    const fn unsupported(operation: &'static str) -> PackageError {
        PackageError::unsupported(operation, AccessorType::CorePackageInfo)
    }
}

#[async_trait]
impl PackageAccessor for CorePackageInfoHandle {
    fn accessor_type(&self) -> AccessorType {
        AccessorType::CorePackageInfo
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
        Ok(())
    }

    async fn try_package_read(&self) -> AccessResult {
        Ok(())
    }

    async fn check_package_container_write_access(&self) -> AccessResult {
        if self.store.is_none() {
            return Err(Reason::new(
                "There is an internal issue in Package Manager",
                "No package info store configured",
            ));
        }
        Ok(())
    }

    async fn get_package_actual_version(&self) -> PackageResult<PackageVersion> {
        Err(Self::unsupported("get_package_actual_version"))
    }

    async fn remove_package(&self) -> PackageResult<()> {
        Err(Self::unsupported("remove_package"))
    }

    async fn get_package_read_stream(&self) -> PackageResult<PackageReadStream> {
        Err(Self::unsupported("get_package_read_stream"))
    }

    async fn put_package_stream(&self, source: PackageReader) -> PackageResult<PutPackageHandle> {
        drop(source);
        Err(Self::unsupported("put_package_stream"))
    }

    async fn finalize_package(&self) -> PackageResult<()> {
        Ok(())
    }

    async fn fetch_metadata(&self) -> PackageResult<Option<Value>> {
        Ok(None)
    }

    async fn update_metadata(&self, metadata: &Value) -> PackageResult<()> {
        let _ = metadata;
        Err(Self::unsupported("update_metadata"))
    }

    async fn remove_metadata(&self) -> PackageResult<()> {
        Ok(())
    }

    async fn run_cron_job(&self, container: &PackageContainerExpectation) -> AccessResult {
        let _ = container;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_config::LocationConfig;
    use ferry_core::{FileContent, FileVersion};
    use ferry_events::EventBus;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};

    #[derive(Default)]
    struct Records(Mutex<HashMap<String, (String, Value)>>);

    #[async_trait]
    impl PackageInfoStore for Records {
        async fn fetch_package_info_hash(&self, key: &PackageInfoKey) -> PackageResult<Option<String>> {
            let records = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(records.get(&key.storage_key()).map(|(hash, _)| hash.clone()))
        }

        async fn store_package_info(
            &self,
            key: &PackageInfoKey,
            hash: &str,
            payload: Value,
        ) -> PackageResult<()> {
            let mut records = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            records.insert(key.storage_key(), (hash.to_string(), payload));
            Ok(())
        }

        async fn remove_package_info(&self, key: &PackageInfoKey) -> PackageResult<()> {
            let mut records = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            records.remove(&key.storage_key());
            Ok(())
        }
    }

    fn key() -> PackageInfoKey {
        PackageInfoKey::new(
            "ingest",
            FileContent::new("report.mov"),
            FileVersion::sized(1_024, 1_700_000_000_000),
        )
    }

    #[tokio::test]
    async fn records_flow_through_the_configured_store() -> anyhow::Result<()> {
        let ctx = AccessorContext::new(LocationConfig::default(), EventBus::new())
            .with_package_info(Arc::new(Records::default()));
        let handle = CorePackageInfoHandle::new(
            &ctx,
            "core",
            AccessorOnPackage::core_package_info().readable().writable(),
        );
        assert!(handle.check_handle_write().is_ok());
        assert!(handle.check_package_container_write_access().await.is_ok());

        assert_eq!(handle.fetch_package_info_hash(&key()).await?, None);
        handle
            .store_package_info(&key(), "abc", json!({ "streams": [] }))
            .await?;
        assert_eq!(handle.fetch_package_info_hash(&key()).await?.as_deref(), Some("abc"));
        handle.remove_package_info(&key()).await?;
        assert_eq!(handle.fetch_package_info_hash(&key()).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn missing_store_is_a_configuration_error() -> anyhow::Result<()> {
        let ctx = AccessorContext::new(LocationConfig::default(), EventBus::new());
        let handle = CorePackageInfoHandle::new(
            &ctx,
            "core",
            AccessorOnPackage::core_package_info().writable(),
        );
        assert!(handle.check_package_container_write_access().await.is_err());
        assert!(matches!(
            handle.fetch_package_info_hash(&key()).await,
            Err(PackageError::InternalConfig { .. })
        ));
        assert!(matches!(
            handle.get_package_read_stream().await,
            Err(PackageError::UnsupportedOperation { .. })
        ));
        assert_eq!(handle.fetch_metadata().await?, None);
        Ok(())
    }
}
