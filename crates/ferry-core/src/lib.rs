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

//! Backend-agnostic model and protocol for package reconciliation.
//!
//! Layout: `model/` (expectations, containers, accessors, version
//! fingerprints), `outcome.rs` (protocol answers), `work.rs` (cancellable
//! execution handles), `service.rs` (worker and record-store traits),
//! `error.rs` (package error taxonomy).

pub mod error;
pub mod model;
pub mod outcome;
pub mod service;
pub mod work;

pub use error::{AccessResult, PackageError, PackageResult, Reason};
pub use model::{
    AccessorId, AccessorOnPackage, AccessorType, ChecksumType, CleanupCronjob, ClipContent,
    ClipTargetRequirement, ClipVersion, Cronjob, CronjobSettings, Expectation, ExpectationId,
    ExpectationSpec, FileContent, FileTargetRequirement, FileVersion, IntervalCronjob,
    MediaFileCopy, MediaFileScan, Monitor, MonitorSettings, PackageContainerExpectation,
    PackageContainerOnPackage, PackagesMonitor, ScanSourceRequirement, SourceRequirement,
    StatusReport, TapeClipCopy, WorkOptions, compare_clip_version, compare_file_version,
};
pub use outcome::{FulfilledOutcome, ReadyOutcome, RemovedOutcome, SupportOutcome};
pub use service::{ExpectationWorker, MonitorSet, PackageInfoKey, PackageInfoStore};
pub use work::{MonitorInProgress, WorkInProgress, WorkOutcome, WorkReporter, WorkState};
