//! Domain model shared by workers and accessors.

mod accessor;
mod container;
mod expectation;
mod version;

pub use accessor::{AccessorId, AccessorOnPackage, AccessorType};
pub use container::{
    CleanupCronjob, Cronjob, CronjobSettings, IntervalCronjob, Monitor, MonitorSettings,
    PackageContainerExpectation, PackageContainerOnPackage, PackagesMonitor,
};
pub use expectation::{
    ClipContent, ClipTargetRequirement, Expectation, ExpectationId, ExpectationSpec,
    FileContent, FileTargetRequirement, MediaFileCopy, MediaFileScan, ScanSourceRequirement,
    SourceRequirement, StatusReport, TapeClipCopy, WorkOptions,
};
pub use version::{
    ChecksumType, ClipVersion, FileVersion, compare_clip_version, compare_file_version,
};
