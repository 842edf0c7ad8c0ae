#![forbid(unsafe_code)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Drive-letter mapping for network shares.
//!
//! Mapping a share onto a drive letter makes repeated file operations much faster
//! than UNC access, but letters are a scarce machine-wide resource shared by every
//! worker process. This crate keeps the letter mapping in versioned worker storage,
//! reconciles it against the OS mount table, and falls back to direct paths when no
//! letter is free.

pub mod error;
pub mod manager;
pub mod mount;
pub mod net_use;
pub mod storage;

pub use error::{DriveError, DriveResult};
pub use manager::{DriveLetterManager, DriveSettings, PrepareRequest, PreparedPath};
pub use mount::{MountTable, NetUseDrive, NetworkDrive};
pub use net_use::{NetUseEntry, parse_net_use};
pub use storage::{MemoryWorkerStorage, StorageUpdate, Versioned, WorkerStorage, storage_update};
