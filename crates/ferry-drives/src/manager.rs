//! Drive-letter resource manager for network shares.
//!
//! # Design
//! - The letter→share mapping lives in [`WorkerStorage`] under
//!   `fileShare_driveLetters_<computerId>` so every worker on the machine shares it.
//! - Fast path: a plain read; a share already listed under some letter is used even
//!   if the entry is stale. Callers that then fail to access it retry with
//!   `force_remount`.
//! - Slow path: a serialised storage write that re-checks the cache, optionally
//!   unmounts a stale entry, rebuilds the mapping from the OS mount table, and
//!   mounts onto the first free candidate letter. Every tool call inside has its own shorter
//!   timeout.
//! - With no free letter, or with mapping disabled, the share is used by its UNC
//!   path; credentialed shares get a session registered first.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ferry_config::WorkerConfig;
use ferry_events::{Event, EventBus};
use ferry_telemetry::Metrics;
use regex::RegexBuilder;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{DriveError, DriveResult};
use crate::mount::{MountTable, NetworkDrive};
use crate::storage::{WorkerStorage, storage_update};

/// Mount-tool messages that are known to be reported even when the mount succeeded.
const TRANSIENT_MOUNT_ERROR: &str = "invalid response|Ugyldig svar";
/// Listing the mount table reports this when the table is empty.
const EMPTY_LIST_ERROR: &str = r"No Instance\(s\) Available";
/// A session to the same server exists under other credentials.
const CONFLICTING_SESSION_ERROR: &str = "multiple connections to a";

/// Tuning for [`DriveLetterManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveSettings {
    /// Identity of this machine; scopes the shared mapping.
    pub computer_id: String,
    /// Candidate letters in preference order.
    pub letters: Vec<char>,
    /// Whether shares may be mapped onto letters at all.
    pub mapping_enabled: bool,
    /// Whether credentialed sessions are registered for direct access.
    pub credential_sessions: bool,
    /// Bounded wait for the shared mapping's write lock.
    pub outer_timeout: Duration,
    /// Budget for each mount-tool call made while holding the lock.
    pub inner_timeout: Duration,
}

impl DriveSettings {
    /// Derive settings from the worker configuration.
    #[must_use]
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            computer_id: config.location.local_computer_id.clone(),
            letters: config.windows_drive_letters.clone(),
            mapping_enabled: config.drive_mapping.enabled,
            credential_sessions: cfg!(windows),
            outer_timeout: Duration::from_millis(config.drive_mapping.outer_timeout_ms),
            inner_timeout: Duration::from_millis(config.drive_mapping.inner_timeout_ms),
        }
    }

    /// Storage key for this machine's mapping.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("fileShare_driveLetters_{}", self.computer_id)
    }
}

/// Share to prepare.
#[derive(Debug, Clone, Copy)]
pub struct PrepareRequest<'a> {
    /// UNC path of the share.
    pub folder_path: &'a str,
    /// Optional account for the share.
    pub user_name: Option<&'a str>,
    /// Password for `user_name`.
    pub password: Option<&'a str>,
    /// Drop and remount an existing mapping for this share.
    pub force_remount: bool,
    /// Skip letter mapping for this accessor.
    pub disable_drive_mapping: bool,
}

impl<'a> PrepareRequest<'a> {
    /// Prepare `folder_path` with default options.
    #[must_use]
    pub const fn new(folder_path: &'a str) -> Self {
        Self {
            folder_path,
            user_name: None,
            password: None,
            force_remount: false,
            disable_drive_mapping: false,
        }
    }
}

/// How a share should be addressed after preparation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedPath {
    /// The share is reachable through a drive letter.
    Mapped {
        /// Drive letter.
        letter: char,
        /// Folder root, e.g. `X:\`.
        root: String,
    },
    /// The share is addressed by its original path.
    Direct {
        /// Original UNC path.
        path: String,
    },
}

impl PreparedPath {
    fn mapped(letter: char) -> Self {
        Self::Mapped {
            letter,
            root: format!("{letter}:\\"),
        }
    }

    /// Folder to use for file operations.
    #[must_use]
    pub fn root(&self) -> &str {
        match self {
            Self::Mapped { root, .. } => root,
            Self::Direct { path } => path,
        }
    }
}

/// Letter→share mapping as persisted in worker storage.
type MappedDriveLetters = BTreeMap<String, String>;

fn letter_for(mapping: &MappedDriveLetters, folder_path: &str) -> Option<char> {
    mapping
        .iter()
        .filter(|(_, mounted)| mounted.eq_ignore_ascii_case(folder_path))
        .filter_map(|(letter, _)| letter.chars().next())
        .last()
}

fn matches_pattern(pattern: &str, text: &str) -> DriveResult<bool> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| DriveError::Pattern { source })?;
    Ok(regex.is_match(text))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Assigns drive letters to network shares, shared across workers on one machine.
#[derive(Clone)]
pub struct DriveLetterManager {
    storage: Arc<dyn WorkerStorage>,
    drive: Arc<dyn NetworkDrive>,
    settings: DriveSettings,
    events: Option<EventBus>,
    metrics: Option<Metrics>,
}

impl std::fmt::Debug for DriveLetterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveLetterManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DriveLetterManager {
    /// Create a manager over `storage` and `drive`.
    #[must_use]
    pub fn new(
        storage: Arc<dyn WorkerStorage>,
        drive: Arc<dyn NetworkDrive>,
        settings: DriveSettings,
    ) -> Self {
        Self {
            storage,
            drive,
            settings,
            events: None,
            metrics: None,
        }
    }

    /// Publish `DriveMapped` events on `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Count mounts and cache hits in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &DriveSettings {
        &self.settings
    }

    /// Make `request.folder_path` accessible, mapping it onto a drive letter when possible.
    ///
    /// # Errors
    ///
    /// Returns an error when the shared mapping cannot be locked in time, a mount
    /// tool call fails or times out, or a credential session cannot be registered.
    pub async fn prepare_access(&self, request: PrepareRequest<'_>) -> DriveResult<PreparedPath> {
        if self.settings.mapping_enabled
            && !request.disable_drive_mapping
            && let Some(prepared) = self.prepare_mapped(request).await?
        {
            return Ok(prepared);
        }

        if self.settings.credential_sessions
            && let Some(user_name) = request.user_name
        {
            self.register_session(
                request.folder_path,
                user_name,
                request.password.unwrap_or_default(),
            )
            .await?;
        }
        debug!(folder = request.folder_path, "using direct share path");
        Ok(PreparedPath::Direct {
            path: request.folder_path.to_string(),
        })
    }

    async fn prepare_mapped(&self, request: PrepareRequest<'_>) -> DriveResult<Option<PreparedPath>> {
        let key = self.settings.storage_key();

        if !request.force_remount {
            let cached = self.storage.read(&key).await?;
            let mapping = decode(&key, cached.map(|entry| entry.value))?;
            if let Some(letter) = letter_for(&mapping, request.folder_path) {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_drive_cache_hit();
                }
                return Ok(Some(PreparedPath::mapped(letter)));
            }
        }

        let mounted_now = Mutex::new(None::<char>);
        let mounted_ref = &mounted_now;
        let update_key = key.clone();
        let committed = self
            .storage
            .write(
                &key,
                self.settings.outer_timeout,
                storage_update(move |current| async move {
                    let mapping = decode(&update_key, current)?;
                    let mapping = self.update_mapping(mapping, request, mounted_ref).await?;
                    serde_json::to_value(mapping).map_err(|source| DriveError::Decode {
                        key: update_key,
                        source,
                    })
                }),
            )
            .await
            .inspect_err(|err| {
                if let Some(metrics) = &self.metrics {
                    let outcome = match err {
                        DriveError::Timeout { .. } => "timeout",
                        _ => "failed",
                    };
                    metrics.inc_drive_mount(outcome);
                }
            })?;

        let mapping = decode(&key, Some(committed.value))?;
        let Some(letter) = letter_for(&mapping, request.folder_path) else {
            debug!(
                folder = request.folder_path,
                "no free drive letter, falling back to direct access"
            );
            return Ok(None);
        };

        let mounted = mounted_now
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if let Some(metrics) = &self.metrics {
            metrics.inc_drive_mount(if mounted { "mapped" } else { "reused" });
        }
        if mounted && let Some(events) = &self.events {
            events.publish(Event::DriveMapped {
                letter,
                remote: request.folder_path.to_string(),
            });
        }
        Ok(Some(PreparedPath::mapped(letter)))
    }

    async fn update_mapping(
        &self,
        mut mapping: MappedDriveLetters,
        request: PrepareRequest<'_>,
        mounted_now: &Mutex<Option<char>>,
    ) -> DriveResult<MappedDriveLetters> {
        let folder_path = request.folder_path;
        let mut found = letter_for(&mapping, folder_path);

        if let (Some(letter), true) = (found, request.force_remount) {
            mapping.remove(&letter.to_string());
            self.bounded("unmount", self.drive.unmount(letter)).await?;
            info!(%letter, folder = folder_path, "unmounted stale drive letter");
            found = None;
        }
        if found.is_some() {
            return Ok(mapping);
        }

        let actual: MappedDriveLetters = self
            .mounted_letters()
            .await?
            .into_iter()
            .map(|(letter, mounted)| (letter.to_string(), mounted))
            .collect();
        for (letter, stale) in mapping.iter().filter(|(letter, _)| !actual.contains_key(*letter)) {
            debug!(%letter, folder = %stale, "dropping drive letter the OS no longer lists");
        }
        mapping = actual;
        if letter_for(&mapping, folder_path).is_some() {
            return Ok(mapping);
        }

        let Some(free) = self
            .settings
            .letters
            .iter()
            .copied()
            .find(|letter| !mapping.contains_key(&letter.to_string()))
        else {
            return Ok(mapping);
        };

        let mounted = self
            .bounded(
                "mount",
                self.drive
                    .mount(folder_path, free, request.user_name, request.password),
            )
            .await;
        match mounted {
            Ok(()) => info!(letter = %free, folder = folder_path, "mounted network share"),
            Err(err) if matches_pattern(TRANSIENT_MOUNT_ERROR, &err.detail())? => {
                let actual = self.mounted_letters().await?;
                let current = actual.get(&free).map_or("", String::as_str);
                if current.eq_ignore_ascii_case(folder_path) {
                    warn!(
                        error = %err.detail(),
                        letter = %free,
                        folder = folder_path,
                        "suppressed transient mount error, share is mapped"
                    );
                } else {
                    warn!(
                        error = %err.detail(),
                        letter = %free,
                        current,
                        "transient mount error and share is not mapped"
                    );
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }

        mapping.insert(free.to_string(), folder_path.to_string());
        *mounted_now.lock().unwrap_or_else(PoisonError::into_inner) = Some(free);
        Ok(mapping)
    }

    async fn mounted_letters(&self) -> DriveResult<MountTable> {
        match self.bounded("list", self.drive.list()).await {
            Ok(table) => Ok(table),
            Err(err) if matches_pattern(EMPTY_LIST_ERROR, &err.detail())? => Ok(MountTable::new()),
            Err(err) => Err(err),
        }
    }

    async fn register_session(
        &self,
        folder_path: &str,
        user_name: &str,
        password: &str,
    ) -> DriveResult<()> {
        match self
            .drive
            .connect_session(folder_path, user_name, password)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if matches_pattern(CONFLICTING_SESSION_ERROR, &err.detail())? => {
                warn!(
                    folder = folder_path,
                    "replacing conflicting credential session"
                );
                self.drive.disconnect_session(folder_path).await?;
                self.drive
                    .connect_session(folder_path, user_name, password)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = DriveResult<T>> + Send,
    ) -> DriveResult<T> {
        let budget = self.settings.inner_timeout;
        timeout(budget, call)
            .await
            .map_err(|_| DriveError::Timeout {
                operation,
                timeout_ms: millis(budget),
            })?
    }
}

fn decode(key: &str, value: Option<Value>) -> DriveResult<MappedDriveLetters> {
    match value {
        None | Some(Value::Null) => Ok(MappedDriveLetters::new()),
        Some(value) => serde_json::from_value(value).map_err(|source| DriveError::Decode {
            key: key.to_string(),
            source,
        }),
    }
}
