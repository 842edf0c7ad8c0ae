//! Expectations: declarative units of work.
//!
//! The expectation type fixes the shape of its requirements. The set of types
//! is closed; adding one is a schema change that every `match` must handle.

use serde::{Deserialize, Serialize};

use super::container::PackageContainerOnPackage;
use super::version::{ClipVersion, FileVersion};

/// Identifier of an expectation. Re-submission with the same id replaces it.
pub type ExpectationId = String;

/// Declarative desired-state job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
    /// Identifier.
    pub id: ExpectationId,
    /// Labels reported upstream.
    #[serde(default)]
    pub status_report: StatusReport,
    /// Expectations that must be fulfilled before work may start.
    #[serde(default)]
    pub depends_on_fullfilled_ids: Vec<ExpectationId>,
    /// Expectations whose fulfillment should trigger re-evaluation of this one.
    #[serde(default)]
    pub trigger_by_fullfilled_ids: Vec<ExpectationId>,
    /// Execution options.
    #[serde(default)]
    pub work_options: WorkOptions,
    /// Type tag and requirements.
    #[serde(flatten)]
    pub spec: ExpectationSpec,
}

impl Expectation {
    /// Wire name of the expectation type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.spec.type_name()
    }

    /// Source containers in declaration order.
    #[must_use]
    pub fn sources(&self) -> &[PackageContainerOnPackage] {
        match &self.spec {
            ExpectationSpec::MediaFileCopy(spec) => &spec.start_requirement.sources,
            ExpectationSpec::MediaFileScan(spec) => &spec.start_requirement.sources,
            ExpectationSpec::TapeClipCopy(spec) => &spec.start_requirement.sources,
        }
    }

    /// Target containers in declaration order.
    #[must_use]
    pub fn targets(&self) -> &[PackageContainerOnPackage] {
        match &self.spec {
            ExpectationSpec::MediaFileCopy(spec) => &spec.end_requirement.targets,
            ExpectationSpec::MediaFileScan(spec) => &spec.end_requirement.targets,
            ExpectationSpec::TapeClipCopy(spec) => &spec.end_requirement.targets,
        }
    }
}

/// Status labels carried for upstream reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Package this expectation concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    /// Short label.
    #[serde(default)]
    pub label: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
}

/// Execution options shared by all expectation types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOptions {
    /// Schedule removal this many milliseconds later instead of deleting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_delay: Option<u64>,
    /// Write to `<artifact>.pmtemp` and rename into place on finalize.
    #[serde(default)]
    pub use_temporary_file_path: bool,
}

/// Closed set of expectation types with their requirement shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpectationSpec {
    /// Copy a media file between file-like containers.
    MediaFileCopy(MediaFileCopy),
    /// Probe a media file and store the result in the record store.
    MediaFileScan(MediaFileScan),
    /// Copy a clip between tape archives.
    TapeClipCopy(TapeClipCopy),
}

impl ExpectationSpec {
    /// Wire name of the expectation type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::MediaFileCopy(_) => "media_file_copy",
            Self::MediaFileScan(_) => "media_file_scan",
            Self::TapeClipCopy(_) => "tape_clip_copy",
        }
    }
}

/// Sources of a copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRequirement {
    /// Candidate source containers in preference order.
    pub sources: Vec<PackageContainerOnPackage>,
}

/// File path of a file package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    /// Path relative to the container.
    #[serde(default)]
    pub file_path: String,
}

impl FileContent {
    /// Content for `file_path`.
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }
}

/// Clip identity of a tape package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipContent {
    /// Clip guid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    /// Clip title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// File copy requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFileCopy {
    /// Where the file comes from.
    pub start_requirement: SourceRequirement,
    /// Where it must end up and in which version.
    pub end_requirement: FileTargetRequirement,
}

/// Targets of a file copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTargetRequirement {
    /// Candidate target containers in preference order.
    pub targets: Vec<PackageContainerOnPackage>,
    /// Package path.
    pub content: FileContent,
    /// Required source version.
    #[serde(default)]
    pub version: FileVersion,
}

/// Media scan requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFileScan {
    /// The file to scan.
    pub start_requirement: ScanSourceRequirement,
    /// The record store receiving the result.
    pub end_requirement: FileTargetRequirement,
}

/// Source of a scan, also the key of the stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSourceRequirement {
    /// Candidate source containers in preference order.
    pub sources: Vec<PackageContainerOnPackage>,
    /// Package path.
    pub content: FileContent,
    /// Required version.
    #[serde(default)]
    pub version: FileVersion,
}

/// Tape clip copy requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TapeClipCopy {
    /// Where the clip comes from.
    pub start_requirement: SourceRequirement,
    /// Where it must end up.
    pub end_requirement: ClipTargetRequirement,
}

/// Targets of a clip copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipTargetRequirement {
    /// Candidate target archives in preference order.
    pub targets: Vec<PackageContainerOnPackage>,
    /// Clip identity.
    pub content: ClipContent,
    /// Required clip version.
    #[serde(default)]
    pub version: ClipVersion,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccessorType;

    #[test]
    fn copy_expectation_decodes_from_wire_document() -> anyhow::Result<()> {
        let expectation: Expectation = serde_json::from_str(
            r#"{
                "id": "copy-report",
                "type": "media_file_copy",
                "statusReport": { "label": "Copy report.mov" },
                "dependsOnFullfilledIds": ["scan-1"],
                "workOptions": { "removeDelay": 60000, "useTemporaryFilePath": true },
                "startRequirement": {
                    "sources": [{
                        "containerId": "ingest",
                        "accessors": {
                            "local": {
                                "type": "LOCAL_FOLDER",
                                "resourceId": "studio-pc",
                                "folderPath": "/media/ingest",
                                "allowRead": true
                            }
                        }
                    }]
                },
                "endRequirement": {
                    "targets": [{
                        "containerId": "playout",
                        "accessors": {
                            "share": { "type": "FILE_SHARE", "folderPath": "\\\\nas\\playout", "allowWrite": true }
                        }
                    }],
                    "content": { "filePath": "report.mov" },
                    "version": { "fileSize": 1024, "modifiedDate": 1700000000000 }
                }
            }"#,
        )?;
        assert_eq!(expectation.type_name(), "media_file_copy");
        assert_eq!(expectation.work_options.remove_delay, Some(60_000));
        assert!(expectation.work_options.use_temporary_file_path);
        assert_eq!(expectation.depends_on_fullfilled_ids, vec!["scan-1".to_string()]);
        assert_eq!(expectation.sources().len(), 1);
        assert_eq!(
            expectation.targets()[0].accessors["share"].accessor_type,
            AccessorType::FileShare
        );
        let ExpectationSpec::MediaFileCopy(copy) = &expectation.spec else {
            panic!("expected a media file copy");
        };
        assert_eq!(copy.end_requirement.version, FileVersion::sized(1_024, 1_700_000_000_000));

        let encoded = serde_json::to_value(&expectation)?;
        assert_eq!(encoded["type"], "media_file_copy");
        let decoded: Expectation = serde_json::from_value(encoded)?;
        assert_eq!(decoded, expectation);
        Ok(())
    }

    #[test]
    fn unknown_expectation_type_is_rejected() {
        let decoded = serde_json::from_str::<Expectation>(
            r#"{ "id": "x", "type": "package_deep_scan" }"#,
        );
        assert!(decoded.is_err());
    }
}
