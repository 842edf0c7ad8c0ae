//! Version fingerprints and the rules for comparing them.
//!
//! # Design
//! - A fingerprint is partial: any field may be absent, and an absent field
//!   never contradicts a present one.
//! - `matches` is the symmetric equality used for stored records.
//! - `compare_file_version` is the acceptance rule for sources, where an
//!   expected checksum decides on its own.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Reason;

/// Checksum algorithms a file version may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    /// MD5 digest.
    Md5,
    /// SHA-1 digest.
    Sha1,
    /// SHA-256 digest.
    Sha256,
}

/// On-disk state of a file package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileVersion {
    /// Size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Modification time in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_date: Option<i64>,
    /// Content checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Algorithm that produced `checksum`.
    #[serde(
        default,
        rename = "checkSumType",
        skip_serializing_if = "Option::is_none"
    )]
    pub checksum_type: Option<ChecksumType>,
}

impl FileVersion {
    /// Fingerprint carrying only size and modification time.
    #[must_use]
    pub const fn sized(file_size: u64, modified_date: i64) -> Self {
        Self {
            file_size: Some(file_size),
            modified_date: Some(modified_date),
            checksum: None,
            checksum_type: None,
        }
    }

    /// True iff every field present on both sides is equal.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        shared_eq(&self.file_size, &other.file_size)
            && shared_eq(&self.modified_date, &other.modified_date)
            && shared_eq(&self.checksum, &other.checksum)
            && shared_eq(&self.checksum_type, &other.checksum_type)
    }

    /// Stable hex digest of the fingerprint, used as the stored record hash.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        digest(self)
    }
}

/// Decide whether `actual` is an acceptable source for `expected`.
///
/// When both sides carry a checksum it decides alone. Otherwise size is
/// compared, then modification time. Returns `None` when acceptable.
///
/// Callers that want a checksum to decide fill in the actual side first;
/// file accessors only compute SHA-256.
#[must_use]
pub fn compare_file_version(actual: &FileVersion, expected: &FileVersion) -> Option<Reason> {
    if let (Some(actual_sum), Some(expected_sum)) = (&actual.checksum, &expected.checksum) {
        if !shared_eq(&actual.checksum_type, &expected.checksum_type) {
            return Some(mismatch(
                "checksum type",
                actual.checksum_type.map(|kind| format!("{kind:?}")),
                expected.checksum_type.map(|kind| format!("{kind:?}")),
            ));
        }
        if actual_sum != expected_sum {
            return Some(mismatch(
                "checksum",
                Some(actual_sum.clone()),
                Some(expected_sum.clone()),
            ));
        }
        return None;
    }
    if !shared_eq(&actual.file_size, &expected.file_size) {
        return Some(mismatch(
            "file size",
            actual.file_size.map(|size| size.to_string()),
            expected.file_size.map(|size| size.to_string()),
        ));
    }
    if !shared_eq(&actual.modified_date, &expected.modified_date) {
        return Some(mismatch(
            "modified date",
            actual.modified_date.map(|date| date.to_string()),
            expected.modified_date.map(|date| date.to_string()),
        ));
    }
    None
}

/// Version of a clip stored on a tape archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipVersion {
    /// Archive-assigned clip id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_id: Option<u64>,
    /// Clip length in frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<u64>,
    /// Creation timestamp as reported by the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Clone lineage id; equal for copies of the same source clip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_id: Option<u64>,
}

impl ClipVersion {
    /// True iff every field present on both sides is equal.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        shared_eq(&self.clip_id, &other.clip_id)
            && shared_eq(&self.frames, &other.frames)
            && shared_eq(&self.created, &other.created)
            && shared_eq(&self.clone_id, &other.clone_id)
    }

    /// Stable hex digest of the version.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        digest(self)
    }
}

/// Decide whether a clip is an acceptable source. Frames and creation time
/// must match when both sides carry them.
#[must_use]
pub fn compare_clip_version(actual: &ClipVersion, expected: &ClipVersion) -> Option<Reason> {
    if !shared_eq(&actual.frames, &expected.frames) {
        return Some(mismatch(
            "frame count",
            actual.frames.map(|frames| frames.to_string()),
            expected.frames.map(|frames| frames.to_string()),
        ));
    }
    if !shared_eq(&actual.created, &expected.created) {
        return Some(mismatch(
            "creation time",
            actual.created.clone(),
            expected.created.clone(),
        ));
    }
    None
}

fn shared_eq<T: PartialEq>(left: &Option<T>, right: &Option<T>) -> bool {
    match (left, right) {
        (Some(left), Some(right)) => left == right,
        _ => true,
    }
}

fn mismatch(field: &str, actual: Option<String>, expected: Option<String>) -> Reason {
    Reason::new(
        "Source is not the expected version",
        format!(
            "Source {field} differs (actual: {}, expected: {})",
            actual.as_deref().unwrap_or("unset"),
            expected.as_deref().unwrap_or("unset"),
        ),
    )
}

fn digest<T: Serialize>(value: &T) -> String {
    // Serialising plain structs of options and strings cannot fail.
    let encoded = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_version() -> impl Strategy<Value = FileVersion> {
        (
            proptest::option::of(0_u64..4),
            proptest::option::of(0_i64..4),
            proptest::option::of("[ab]"),
        )
            .prop_map(|(file_size, modified_date, checksum)| FileVersion {
                file_size,
                modified_date,
                checksum,
                checksum_type: None,
            })
    }

    fn shared_field_differs(left: &FileVersion, right: &FileVersion) -> bool {
        matches!((left.file_size, right.file_size), (Some(a), Some(b)) if a != b)
            || matches!((left.modified_date, right.modified_date), (Some(a), Some(b)) if a != b)
            || matches!((&left.checksum, &right.checksum), (Some(a), Some(b)) if a != b)
    }

    proptest! {
        #[test]
        fn matches_is_symmetric(left in any_version(), right in any_version()) {
            prop_assert_eq!(left.matches(&right), right.matches(&left));
        }

        #[test]
        fn mismatch_iff_shared_field_differs(left in any_version(), right in any_version()) {
            prop_assert_eq!(!left.matches(&right), shared_field_differs(&left, &right));
        }

        #[test]
        fn acceptance_is_symmetric_in_outcome(left in any_version(), right in any_version()) {
            prop_assert_eq!(
                compare_file_version(&left, &right).is_none(),
                compare_file_version(&right, &left).is_none()
            );
        }
    }

    #[test]
    fn missing_fields_never_contradict() {
        let recorded = FileVersion::sized(1_024, 1_700_000_000_000);
        let minimal = FileVersion {
            file_size: Some(1_024),
            ..FileVersion::default()
        };
        assert!(recorded.matches(&minimal));
        assert!(FileVersion::default().matches(&recorded));
    }

    #[test]
    fn checksum_on_both_sides_takes_precedence() {
        let expected = FileVersion {
            checksum: Some("abc".into()),
            checksum_type: Some(ChecksumType::Sha256),
            ..FileVersion::sized(10, 1)
        };
        let copied = FileVersion {
            checksum: Some("abc".into()),
            checksum_type: Some(ChecksumType::Sha256),
            ..FileVersion::sized(10, 99)
        };
        assert!(compare_file_version(&copied, &expected).is_none());

        let altered = FileVersion {
            checksum: Some("def".into()),
            ..copied
        };
        let reason = compare_file_version(&altered, &expected);
        assert!(reason.is_some_and(|reason| reason.tech.contains("checksum")));
    }

    #[test]
    fn size_mismatch_explains_both_values() {
        let reason = compare_file_version(
            &FileVersion::sized(10, 1),
            &FileVersion::sized(12, 1),
        );
        let Some(reason) = reason else {
            panic!("expected a size mismatch");
        };
        assert_eq!(reason.user, "Source is not the expected version");
        assert!(reason.tech.contains("actual: 10"));
        assert!(reason.tech.contains("expected: 12"));
    }

    #[test]
    fn fingerprint_is_stable_and_field_sensitive() {
        let version = FileVersion::sized(1_024, 1_700_000_000_000);
        assert_eq!(version.fingerprint(), version.clone().fingerprint());
        assert_ne!(
            version.fingerprint(),
            FileVersion::sized(1_025, 1_700_000_000_000).fingerprint()
        );
        assert_eq!(version.fingerprint().len(), 64);
    }

    #[test]
    fn clip_versions_compare_partially() {
        let expected = ClipVersion {
            frames: Some(250),
            ..ClipVersion::default()
        };
        let actual = ClipVersion {
            clip_id: Some(7),
            frames: Some(250),
            created: Some("2024-01-01T00:00:00Z".into()),
            clone_id: None,
        };
        assert!(compare_clip_version(&actual, &expected).is_none());
        assert!(actual.matches(&expected));
        let shorter = ClipVersion {
            frames: Some(100),
            ..actual
        };
        assert!(compare_clip_version(&shorter, &expected).is_some());
    }
}
