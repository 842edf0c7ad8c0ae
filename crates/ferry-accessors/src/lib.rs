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

//! Accessor handlers: one capability contract over every storage backend a
//! package container can point at.
//!
//! Layout: `handle.rs` (the [`PackageAccessor`] trait and the closed
//! [`AccessorHandle`] enum), one module per backend, `file_support.rs`
//! (paths, sidecars, delayed removal and cleanup shared by folder-shaped
//! backends), `monitor.rs` (filesystem watches) and `support.rs` (which
//! accessors a worker can reach at all).

pub mod context;
pub mod core_package_info;
pub mod file_share;
pub mod file_support;
pub mod handle;
pub mod http;
pub mod local_folder;
pub mod monitor;
pub mod support;
pub mod tape;

pub use context::AccessorContext;
pub use core_package_info::CorePackageInfoHandle;
pub use file_share::FileShareHandle;
pub use file_support::{DelayedRemoval, METADATA_SUFFIX, REMOVAL_LEDGER, TEMPORARY_SUFFIX, pending_removals};
pub use handle::{
    AccessorHandle, HandleContent, PackageAccessor, PackageReadInfo, PackageReadStream,
    PackageReader, PackageVersion, PutPackageHandle, WriteCancellation,
};
pub use http::HttpHandle;
pub use local_folder::LocalFolderHandle;
pub use support::supports_access;
pub use tape::{
    ClipCopyRequest, HttpTapeConnector, HttpTapeGateway, TapeClip, TapeConnector, TapeGateway,
    TapeHandle,
};
