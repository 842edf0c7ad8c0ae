//! Default values for worker configuration.
//!
//! # Design
//! - Keep every tunable default in one place so tests and docs agree.
//! - Drive-mapping timeouts keep the inner budget below the outer lock budget.

/// Worker identifier used when none is configured.
pub(crate) const WORKER_ID: &str = "worker-0";
/// Computer identity used when none is configured.
pub(crate) const LOCAL_COMPUTER_ID: &str = "localhost";
/// Candidate drive letters tried in order when mapping shares.
pub(crate) const DRIVE_LETTERS: [char; 3] = ['X', 'Y', 'Z'];
/// Bounded wait for the drive-letter store write lock.
pub(crate) const DRIVE_MAPPING_TIMEOUT_MS: u64 = 1_000;
/// Budget for each mount, unmount or list call inside the write lock.
pub(crate) const DRIVE_MAPPING_INNER_TIMEOUT_MS: u64 = 800;
/// Media probe executable name.
pub(crate) const PROBE_EXECUTABLE: &str = if cfg!(windows) {
    "ffprobe.exe"
} else {
    "ffprobe"
};
/// Budget for one media probe run.
pub(crate) const PROBE_TIMEOUT_MS: u64 = 30_000;
/// Log level when neither file nor environment sets one.
pub(crate) const LOG_LEVEL: &str = "info";
