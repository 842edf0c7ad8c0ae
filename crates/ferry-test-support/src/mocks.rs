//! In-memory stand-ins for the OS mount tool, the record store and tape gateways.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ferry_accessors::{ClipCopyRequest, TapeClip, TapeConnector, TapeGateway};
use ferry_core::{ClipContent, PackageError, PackageInfoKey, PackageInfoStore, PackageResult};
use ferry_drives::{DriveError, DriveResult, MountTable, NetworkDrive};
use serde_json::Value;

/// A scripted failure for the next mount call.
#[derive(Debug, Clone)]
pub struct ScriptedMountError {
    /// Tool output reported with the failure.
    pub detail: String,
    /// Whether the mapping still lands in the live table.
    pub applied: bool,
}

#[derive(Debug, Default)]
struct DriveState {
    table: MountTable,
    mount_errors: VecDeque<ScriptedMountError>,
    list_errors: VecDeque<String>,
    session_errors: VecDeque<String>,
    sessions: Vec<String>,
}

/// Fake mount tool keeping a live table and counting every call.
#[derive(Debug, Default)]
pub struct RecordingDrive {
    state: Mutex<DriveState>,
    delay: Duration,
    mounts: AtomicUsize,
    unmounts: AtomicUsize,
    lists: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl RecordingDrive {
    /// Drive with an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mount call sleeps for `delay` first.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Pretend `remote` is already mounted on `letter`.
    #[must_use]
    pub fn with_mounted(self, letter: char, remote: &str) -> Self {
        self.lock().table.insert(letter, remote.to_string());
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DriveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next mount with `detail`; when `applied` the mapping still happens.
    pub fn fail_next_mount(&self, detail: &str, applied: bool) {
        self.lock().mount_errors.push_back(ScriptedMountError {
            detail: detail.to_string(),
            applied,
        });
    }

    /// Fail the next table listing with `detail`.
    pub fn fail_next_list(&self, detail: &str) {
        self.lock().list_errors.push_back(detail.to_string());
    }

    /// Fail the next session registration with `detail`.
    pub fn fail_next_session(&self, detail: &str) {
        self.lock().session_errors.push_back(detail.to_string());
    }

    /// Current live table.
    #[must_use]
    pub fn table(&self) -> MountTable {
        self.lock().table.clone()
    }

    /// Shares with a registered credential session.
    #[must_use]
    pub fn sessions(&self) -> Vec<String> {
        self.lock().sessions.clone()
    }

    /// Number of mount calls.
    #[must_use]
    pub fn mount_calls(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }

    /// Number of unmount calls.
    #[must_use]
    pub fn unmount_calls(&self) -> usize {
        self.unmounts.load(Ordering::SeqCst)
    }

    /// Number of list calls.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    /// Number of session registrations.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of session tear-downs.
    #[must_use]
    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

fn tool_error(operation: &'static str, detail: String) -> DriveError {
    DriveError::Tool { operation, detail }
}

#[async_trait]
impl NetworkDrive for RecordingDrive {
    async fn mount(
        &self,
        remote: &str,
        letter: char,
        _user_name: Option<&str>,
        _password: Option<&str>,
    ) -> DriveResult<()> {
        self.mounts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut state = self.lock();
        if let Some(scripted) = state.mount_errors.pop_front() {
            if scripted.applied {
                state.table.insert(letter, remote.to_string());
            }
            return Err(tool_error("mount", scripted.detail));
        }
        if state.table.contains_key(&letter) {
            return Err(tool_error("mount", "The local device name is already in use.".into()));
        }
        state.table.insert(letter, remote.to_string());
        Ok(())
    }

    async fn unmount(&self, letter: char) -> DriveResult<()> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        self.lock().table.remove(&letter);
        Ok(())
    }

    async fn list(&self) -> DriveResult<MountTable> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if let Some(detail) = state.list_errors.pop_front() {
            return Err(tool_error("list", detail));
        }
        Ok(state.table.clone())
    }

    async fn connect_session(&self, remote: &str, _user_name: &str, _password: &str) -> DriveResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if let Some(detail) = state.session_errors.pop_front() {
            return Err(tool_error("connect_session", detail));
        }
        state.sessions.push(remote.to_string());
        Ok(())
    }

    async fn disconnect_session(&self, remote: &str) -> DriveResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.lock().sessions.retain(|session| session != remote);
        Ok(())
    }
}

/// A stored scan record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Hash stored with the record.
    pub hash: String,
    /// Record payload.
    pub payload: Value,
}

/// Record store held in memory, keyed by [`PackageInfoKey::storage_key`].
#[derive(Debug, Default)]
pub struct MemoryPackageInfoStore {
    records: Mutex<HashMap<String, StoredRecord>>,
}

impl MemoryPackageInfoStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record stored for `key`.
    #[must_use]
    pub fn record(&self, key: &PackageInfoKey) -> Option<StoredRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key.storage_key())
            .cloned()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no record is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PackageInfoStore for MemoryPackageInfoStore {
    async fn fetch_package_info_hash(&self, key: &PackageInfoKey) -> PackageResult<Option<String>> {
        Ok(self.record(key).map(|record| record.hash))
    }

    async fn store_package_info(&self, key: &PackageInfoKey, hash: &str, payload: Value) -> PackageResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.storage_key(),
                StoredRecord {
                    hash: hash.to_string(),
                    payload,
                },
            );
        Ok(())
    }

    async fn remove_package_info(&self, key: &PackageInfoKey) -> PackageResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key.storage_key());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TapeState {
    clips: Vec<(Option<u32>, TapeClip)>,
    next_id: u64,
}

/// Tape archive held in memory; also acts as the connector for every gateway URL.
#[derive(Debug, Clone, Default)]
pub struct MemoryTapeGateway {
    state: Arc<Mutex<TapeState>>,
    copies: Arc<AtomicUsize>,
}

impl MemoryTapeGateway {
    /// Empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TapeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a clip in `server_id` and return its id.
    pub fn insert_clip(&self, server_id: Option<u32>, guid: &str, frames: u64) -> u64 {
        let mut state = self.lock();
        state.next_id += 1;
        let clip_id = state.next_id;
        state.clips.push((
            server_id,
            TapeClip {
                clip_id,
                guid: Some(guid.to_string()),
                title: None,
                frames: Some(frames),
                created: Some("2024-04-12T10:00:00Z".to_string()),
                clone_id: None,
            },
        ));
        clip_id
    }

    /// Clip matching `guid` in `server_id`.
    #[must_use]
    pub fn clip(&self, server_id: Option<u32>, guid: &str) -> Option<TapeClip> {
        let content = ClipContent {
            guid: Some(guid.to_string()),
            title: None,
        };
        self.lock()
            .clips
            .iter()
            .find(|(server, clip)| *server == server_id && clip_matches(clip, &content))
            .map(|(_, clip)| clip.clone())
    }

    /// Number of copy jobs run.
    #[must_use]
    pub fn copy_calls(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }
}

fn clip_matches(clip: &TapeClip, content: &ClipContent) -> bool {
    let guid = content.guid.as_ref().is_none_or(|guid| clip.guid.as_ref() == Some(guid));
    let title = content.title.as_ref().is_none_or(|title| clip.title.as_ref() == Some(title));
    guid && title
}

#[async_trait]
impl TapeGateway for MemoryTapeGateway {
    async fn ping(&self) -> PackageResult<()> {
        Ok(())
    }

    async fn find_clip(&self, server_id: Option<u32>, content: &ClipContent) -> PackageResult<Option<TapeClip>> {
        Ok(self
            .lock()
            .clips
            .iter()
            .find(|(server, clip)| *server == server_id && clip_matches(clip, content))
            .map(|(_, clip)| clip.clone()))
    }

    async fn copy_clip(&self, request: &ClipCopyRequest) -> PackageResult<TapeClip> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        let source = state
            .clips
            .iter()
            .find(|(server, clip)| *server == request.source_server_id && clip.clip_id == request.source_clip_id)
            .map(|(_, clip)| clip.clone())
            .ok_or_else(|| PackageError::NotFound {
                operation: "copy_clip",
                target: request.source_clip_id.to_string(),
                detail: "source clip not found".to_string(),
            })?;
        state.next_id += 1;
        let copy = TapeClip {
            clip_id: state.next_id,
            guid: request.target.guid.clone(),
            title: request.target.title.clone(),
            frames: source.frames,
            created: source.created.clone(),
            clone_id: Some(source.clone_id.unwrap_or(source.clip_id)),
        };
        state.clips.push((request.target_server_id, copy.clone()));
        Ok(copy)
    }

    async fn delete_clip(&self, server_id: Option<u32>, clip_id: u64) -> PackageResult<()> {
        self.lock()
            .clips
            .retain(|(server, clip)| !(*server == server_id && clip.clip_id == clip_id));
        Ok(())
    }
}

impl TapeConnector for MemoryTapeGateway {
    fn connect(&self, _gateway_url: &str) -> PackageResult<Arc<dyn TapeGateway>> {
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_mount_errors_can_still_apply() -> anyhow::Result<()> {
        let drive = RecordingDrive::new();
        drive.fail_next_mount("System error 58: invalid response", true);
        assert!(drive.mount(r"\\nas\media", 'X', None, None).await.is_err());
        assert_eq!(drive.table().get(&'X').map(String::as_str), Some(r"\\nas\media"));
        assert!(drive.mount(r"\\nas\other", 'X', None, None).await.is_err());
        assert_eq!(drive.mount_calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn copied_clips_share_lineage() -> anyhow::Result<()> {
        let tape = MemoryTapeGateway::new();
        let source = tape.insert_clip(Some(1), "news-0412", 1_500);
        let copy = tape
            .copy_clip(&ClipCopyRequest {
                source_gateway_url: "memory".into(),
                source_server_id: Some(1),
                source_clip_id: source,
                target_server_id: Some(2),
                target: ClipContent {
                    guid: Some("news-0412".into()),
                    title: None,
                },
            })
            .await?;
        assert_eq!(copy.clone_id, Some(source));
        assert_eq!(tape.clip(Some(2), "news-0412"), Some(copy));
        Ok(())
    }
}
