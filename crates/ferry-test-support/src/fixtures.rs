//! Temp folders, file writers and model builders.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use ferry_config::LocationConfig;
use ferry_core::{
    AccessorOnPackage, ClipContent, ClipTargetRequirement, ClipVersion, Expectation,
    ExpectationSpec, FileContent, FileTargetRequirement, FileVersion, MediaFileCopy,
    MediaFileScan, PackageContainerExpectation, PackageContainerOnPackage, ScanSourceRequirement,
    SourceRequirement, StatusReport, TapeClipCopy, WorkOptions,
};
use tempfile::TempDir;

/// Computer id used by the builders for machine-local accessors.
pub const COMPUTER_ID: &str = "studio-pc";

/// Location of a worker running on [`COMPUTER_ID`] inside `network`.
#[must_use]
pub fn location(network: &str) -> LocationConfig {
    LocationConfig {
        local_computer_id: COMPUTER_ID.to_string(),
        local_network_ids: vec![network.to_string()],
    }
}

/// Fresh temporary folder, removed on drop.
///
/// # Errors
///
/// Returns an error when the folder cannot be created.
pub fn temp_folder() -> Result<TempDir> {
    TempDir::new().context("failed to create temporary folder")
}

/// Display form of `dir`, as accessors expect it.
#[must_use]
pub fn folder_of(dir: &TempDir) -> String {
    dir.path().display().to_string()
}

/// Write `bytes` to `relative` below `dir`, creating parent folders.
///
/// # Errors
///
/// Returns an error when the file cannot be written.
pub fn write_file(dir: &Path, relative: &str, bytes: &[u8]) -> Result<PathBuf> {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Write a file whose modification time lies `age` in the past.
///
/// # Errors
///
/// Returns an error when the file cannot be written or its time cannot be set.
pub fn write_aged_file(dir: &Path, relative: &str, bytes: &[u8], age: Duration) -> Result<PathBuf> {
    let path = write_file(dir, relative, bytes)?;
    let modified = SystemTime::now()
        .checked_sub(age)
        .context("age reaches before the epoch")?;
    File::options()
        .write(true)
        .open(&path)?
        .set_modified(modified)
        .with_context(|| format!("failed to age {}", path.display()))?;
    Ok(path)
}

/// Write an executable shell script printing `stdout` and exiting with `code`.
///
/// # Errors
///
/// Returns an error when the script cannot be written or marked executable.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, stdout: &str, code: i32) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let body = format!("#!/bin/sh\ncat <<'OUTPUT'\n{stdout}\nOUTPUT\nexit {code}\n");
    let path = write_file(dir, name, body.as_bytes())?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Single-accessor container for a local folder on [`COMPUTER_ID`].
#[must_use]
pub fn local_container(container_id: &str, folder: &str) -> PackageContainerOnPackage {
    PackageContainerOnPackage::new(container_id, container_id).with_accessor(
        "local",
        AccessorOnPackage::local_folder(COMPUTER_ID, folder)
            .readable()
            .writable(),
    )
}

/// Single-accessor container for the record store.
#[must_use]
pub fn core_info_container(container_id: &str) -> PackageContainerOnPackage {
    PackageContainerOnPackage::new(container_id, container_id).with_accessor(
        "core",
        AccessorOnPackage::core_package_info().readable().writable(),
    )
}

/// Single-accessor container for a tape archive.
#[must_use]
pub fn tape_container(container_id: &str, gateway_url: &str, server_id: u32) -> PackageContainerOnPackage {
    let mut accessor = AccessorOnPackage::tape(gateway_url).readable().writable();
    accessor.server_id = Some(server_id);
    PackageContainerOnPackage::new(container_id, container_id).with_accessor("tape", accessor)
}

/// Maintained container carrying the accessors of `container`.
#[must_use]
pub fn container_expectation(container: &PackageContainerOnPackage) -> PackageContainerExpectation {
    PackageContainerExpectation {
        id: container.container_id.clone(),
        label: container.label.clone(),
        accessors: container.accessors.clone(),
        cronjobs: ferry_core::CronjobSettings::default(),
        monitors: ferry_core::MonitorSettings::default(),
    }
}

fn expectation(id: &str, label: &str, spec: ExpectationSpec) -> Expectation {
    Expectation {
        id: id.to_string(),
        status_report: StatusReport {
            package_id: None,
            label: label.to_string(),
            description: String::new(),
        },
        depends_on_fullfilled_ids: Vec::new(),
        trigger_by_fullfilled_ids: Vec::new(),
        work_options: WorkOptions::default(),
        spec,
    }
}

/// Copy of `file_path` from `source` to `target`.
#[must_use]
pub fn media_file_copy(
    id: &str,
    source: PackageContainerOnPackage,
    target: PackageContainerOnPackage,
    file_path: &str,
    version: FileVersion,
) -> Expectation {
    expectation(
        id,
        &format!("Copy {file_path}"),
        ExpectationSpec::MediaFileCopy(MediaFileCopy {
            start_requirement: SourceRequirement {
                sources: vec![source],
            },
            end_requirement: FileTargetRequirement {
                targets: vec![target],
                content: FileContent::new(file_path),
                version,
            },
        }),
    )
}

/// Scan of `file_path` in `source`, recorded in `target`.
#[must_use]
pub fn media_file_scan(
    id: &str,
    source: PackageContainerOnPackage,
    target: PackageContainerOnPackage,
    file_path: &str,
    version: FileVersion,
) -> Expectation {
    expectation(
        id,
        &format!("Scan {file_path}"),
        ExpectationSpec::MediaFileScan(MediaFileScan {
            start_requirement: ScanSourceRequirement {
                sources: vec![source],
                content: FileContent::new(file_path),
                version: version.clone(),
            },
            end_requirement: FileTargetRequirement {
                targets: vec![target],
                content: FileContent::new(file_path),
                version,
            },
        }),
    )
}

/// Copy of the clip `guid` between two tape archives.
#[must_use]
pub fn tape_clip_copy(
    id: &str,
    source: PackageContainerOnPackage,
    target: PackageContainerOnPackage,
    guid: &str,
) -> Expectation {
    expectation(
        id,
        &format!("Copy clip {guid}"),
        ExpectationSpec::TapeClipCopy(TapeClipCopy {
            start_requirement: SourceRequirement {
                sources: vec![source],
            },
            end_requirement: ClipTargetRequirement {
                targets: vec![target],
                content: ClipContent {
                    guid: Some(guid.to_string()),
                    title: None,
                },
                version: ClipVersion::default(),
            },
        }),
    )
}
