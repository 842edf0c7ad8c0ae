//! Collaborators shared by every accessor handle a worker creates.

use std::sync::Arc;

use ferry_config::LocationConfig;
use ferry_core::PackageInfoStore;
use ferry_drives::DriveLetterManager;
use ferry_events::EventBus;

use crate::tape::{HttpTapeConnector, TapeConnector};

/// Everything a handle needs beyond its accessor description.
///
/// Cloning is cheap; all members are reference counted.
#[derive(Clone)]
pub struct AccessorContext {
    location: LocationConfig,
    events: EventBus,
    http: reqwest::Client,
    drives: Option<DriveLetterManager>,
    package_info: Option<Arc<dyn PackageInfoStore>>,
    tape: Arc<dyn TapeConnector>,
}

impl std::fmt::Debug for AccessorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessorContext")
            .field("location", &self.location)
            .field("drives", &self.drives)
            .field("package_info", &self.package_info.is_some())
            .finish_non_exhaustive()
    }
}

impl AccessorContext {
    /// Context for a worker at `location`, publishing on `events`.
    #[must_use]
    pub fn new(location: LocationConfig, events: EventBus) -> Self {
        let http = reqwest::Client::new();
        Self {
            location,
            events,
            tape: Arc::new(HttpTapeConnector::new(http.clone())),
            http,
            drives: None,
            package_info: None,
        }
    }

    /// Route file-share access through `drives`.
    #[must_use]
    pub fn with_drives(mut self, drives: DriveLetterManager) -> Self {
        self.drives = Some(drives);
        self
    }

    /// Record store used by `CORE_PACKAGE_INFO` accessors.
    #[must_use]
    pub fn with_package_info(mut self, store: Arc<dyn PackageInfoStore>) -> Self {
        self.package_info = Some(store);
        self
    }

    /// Replace the tape gateway connector.
    #[must_use]
    pub fn with_tape_connector(mut self, connector: Arc<dyn TapeConnector>) -> Self {
        self.tape = connector;
        self
    }

    /// Replace the HTTP client used by `HTTP` accessors.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Machine and network identity of the worker.
    #[must_use]
    pub const fn location(&self) -> &LocationConfig {
        &self.location
    }

    /// Event bus for monitor notifications.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) const fn drives(&self) -> Option<&DriveLetterManager> {
        self.drives.as_ref()
    }

    pub(crate) fn package_info(&self) -> Option<Arc<dyn PackageInfoStore>> {
        self.package_info.clone()
    }

    pub(crate) fn tape(&self) -> Arc<dyn TapeConnector> {
        Arc::clone(&self.tape)
    }
}
