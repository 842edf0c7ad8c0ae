//! Keyed, versioned worker storage shared by every worker on a machine.
//!
//! # Design
//! - Reads never wait on writers; they return the last committed value.
//! - Writes are serialised per key with a bounded wait for the key lock; the
//!   update function runs inside the lock and its result is committed only when
//!   it succeeds.
//! - Versions increase by one per committed write.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{DriveError, DriveResult};

/// A stored value with its commit version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Number of committed writes for the key.
    pub version: u64,
    /// Current value.
    pub value: T,
}

/// Read-modify-write callback handed to [`WorkerStorage::write`].
pub type StorageUpdate<'a> =
    Box<dyn FnOnce(Option<Value>) -> BoxFuture<'a, DriveResult<Value>> + Send + 'a>;

/// Box an async closure as a [`StorageUpdate`].
pub fn storage_update<'a, F, Fut>(update: F) -> StorageUpdate<'a>
where
    F: FnOnce(Option<Value>) -> Fut + Send + 'a,
    Fut: Future<Output = DriveResult<Value>> + Send + 'a,
{
    Box::new(move |current| -> BoxFuture<'a, DriveResult<Value>> { Box::pin(update(current)) })
}

/// Shared key-value state for workers on one machine.
#[async_trait]
pub trait WorkerStorage: Send + Sync {
    /// Read the committed value for `key` without waiting on writers.
    async fn read(&self, key: &str) -> DriveResult<Option<Versioned<Value>>>;

    /// Serialised read-modify-write of `key`.
    ///
    /// Waits at most `lock_timeout` for other writers. A failing `update` leaves
    /// the stored value untouched.
    async fn write<'a>(
        &'a self,
        key: &'a str,
        lock_timeout: Duration,
        update: StorageUpdate<'a>,
    ) -> DriveResult<Versioned<Value>>;
}

/// Process-local [`WorkerStorage`].
#[derive(Debug, Default, Clone)]
pub struct MemoryWorkerStorage {
    entries: Arc<DashMap<String, Versioned<Value>>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryWorkerStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl WorkerStorage for MemoryWorkerStorage {
    async fn read(&self, key: &str) -> DriveResult<Option<Versioned<Value>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn write<'a>(
        &'a self,
        key: &'a str,
        lock_timeout: Duration,
        update: StorageUpdate<'a>,
    ) -> DriveResult<Versioned<Value>> {
        let lock = self.key_lock(key);
        let _guard = timeout(lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| DriveError::Timeout {
                operation: "worker_storage_write",
                timeout_ms: millis(lock_timeout),
            })?;

        let current = self.entries.get(key).map(|entry| entry.value().clone());
        let version = current.as_ref().map_or(0, |entry| entry.version);
        let value = update(current.map(|entry| entry.value)).await?;

        let committed = Versioned {
            version: version + 1,
            value,
        };
        self.entries.insert(key.to_string(), committed.clone());
        debug!(key, version = committed.version, "worker storage committed");
        Ok(committed)
    }
}
