//! # Design
//!
//! - Provide structured, constant-message errors for package operations.
//! - Capture operation context (targets, fields, raw detail) so every failure can be
//!   rendered as a user phrase plus a technical string.
//! - Classify OS errors into the package taxonomy at construction time.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::AccessorType;

/// Result type for package operations.
pub type PackageResult<T> = Result<T, PackageError>;

/// Result of a check operation. Check operations never raise; they explain.
pub type AccessResult = Result<(), Reason>;

/// Windows `ERROR_SHARING_VIOLATION`, reported when another process holds a file open.
const WINDOWS_SHARING_VIOLATION: i32 = 32;

/// Two-part explanation attached to every failure reported upward.
///
/// `user` is a short phrase suitable for display; `tech` carries the raw
/// underlying error text for logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reason {
    /// User-facing phrase without raw OS text.
    pub user: String,
    /// Technical detail including the raw error string.
    pub tech: String,
}

impl Reason {
    /// Build a reason from separate user and technical texts.
    pub fn new(user: impl Into<String>, tech: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            tech: tech.into(),
        }
    }

    /// Build a reason whose user and technical texts are identical.
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            user: text.clone(),
            tech: text,
        }
    }

    /// Prefix both texts, keeping the original wording after a colon.
    #[must_use]
    pub fn prefixed(&self, prefix: &str) -> Self {
        Self {
            user: format!("{prefix}: {}", self.user),
            tech: format!("{prefix}: {}", self.tech),
        }
    }
}

impl Display for Reason {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.user)
    }
}

impl Error for Reason {}

/// Errors produced by package accessors and workers.
#[derive(Debug, Error)]
pub enum PackageError {
    /// Capability flag false or OS permission error.
    #[error("package access denied")]
    AccessDenied {
        /// Operation that was refused.
        operation: &'static str,
        /// Package or container the operation targeted.
        target: String,
        /// Raw underlying detail.
        detail: String,
    },
    /// Artifact or container absent.
    #[error("package not found")]
    NotFound {
        /// Operation that failed.
        operation: &'static str,
        /// Package or container the operation targeted.
        target: String,
        /// Raw underlying detail.
        detail: String,
    },
    /// Artifact locked by another process.
    #[error("package busy")]
    Busy {
        /// Operation that failed.
        operation: &'static str,
        /// Package the operation targeted.
        target: String,
        /// Raw underlying detail.
        detail: String,
    },
    /// Bounded external operation exceeded its budget.
    #[error("package operation timed out")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Budget that was exceeded.
        timeout_ms: u64,
    },
    /// Operation was stopped before it finished.
    #[error("package operation cancelled")]
    Cancelled {
        /// Operation that was stopped.
        operation: &'static str,
    },
    /// Operation not meaningful for the accessor backend.
    #[error("operation not supported by accessor")]
    UnsupportedOperation {
        /// Operation that was requested.
        operation: &'static str,
        /// Backend the operation was requested on.
        accessor_type: AccessorType,
    },
    /// Malformed accessor, content or work options.
    #[error("invalid package configuration")]
    InternalConfig {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// IO failures that do not map onto a more specific variant.
    #[error("package io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// JSON failures for metadata sidecars and records.
    #[error("package metadata json failure")]
    Json {
        /// Operation that triggered the JSON failure.
        operation: &'static str,
        /// Location of the document.
        location: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// HTTP transport or status failures.
    #[error("package http failure")]
    Http {
        /// Operation that triggered the HTTP failure.
        operation: &'static str,
        /// Request URL.
        url: String,
        /// Response status when one was received.
        status: Option<u16>,
        /// Raw underlying detail.
        detail: String,
    },
    /// External tool exited unsuccessfully or produced unusable output.
    #[error("external process failure")]
    Process {
        /// Program that was run.
        program: String,
        /// Raw underlying detail.
        detail: String,
    },
    /// No source or target resolved when work was requested.
    #[error("expectation not ready to start")]
    NotReady {
        /// Expectation that was requested.
        expectation_id: String,
        /// Why the lookup failed.
        #[source]
        reason: Reason,
    },
    /// Preparing a network share for access failed.
    #[error("network share preparation failed")]
    Drive {
        /// Share path that was being prepared.
        folder: String,
        /// Underlying drive-mapping error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl PackageError {
    /// Classify an IO error into the package taxonomy.
    pub fn io(operation: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref();
        let target = path.display().to_string();
        if is_busy(&source) {
            return Self::Busy {
                operation,
                target,
                detail: source.to_string(),
            };
        }
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound {
                operation,
                target,
                detail: source.to_string(),
            },
            io::ErrorKind::PermissionDenied => Self::AccessDenied {
                operation,
                target,
                detail: source.to_string(),
            },
            _ => Self::Io {
                operation,
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Wrap a JSON failure for a metadata document.
    pub fn json(
        operation: &'static str,
        location: impl Into<String>,
        source: serde_json::Error,
    ) -> Self {
        Self::Json {
            operation,
            location: location.into(),
            source,
        }
    }

    /// Report an operation the backend cannot perform.
    #[must_use]
    pub const fn unsupported(operation: &'static str, accessor_type: AccessorType) -> Self {
        Self::UnsupportedOperation {
            operation,
            accessor_type,
        }
    }

    /// Report malformed input data.
    #[must_use]
    pub const fn config(field: &'static str, reason: &'static str, value: Option<String>) -> Self {
        Self::InternalConfig {
            field,
            reason,
            value,
        }
    }

    /// Whether the error represents an OS permission failure.
    #[must_use]
    pub const fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }

    /// Whether the error represents a missing artifact.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Render the error as a user phrase plus technical detail.
    #[must_use]
    pub fn reason(&self) -> Reason {
        if let Self::NotReady { reason, .. } = self {
            return reason.prefixed("Can't start working");
        }
        let user = match self {
            Self::AccessDenied { .. } => "Not allowed to access package",
            Self::NotFound { .. } => "Package does not exist",
            Self::Busy { .. } => "Package is busy",
            Self::Timeout { .. } => "Operation timed out",
            Self::Cancelled { .. } => "Operation was cancelled",
            Self::UnsupportedOperation { .. } => "Operation not supported",
            Self::InternalConfig { .. } => "There is an internal issue in Package Manager",
            Self::Io { .. } => "Not able to access package",
            Self::Json { .. } => "Package metadata is unreadable",
            Self::Http { .. } => "Not able to reach package server",
            Self::Process { .. } => "External tool failed",
            Self::NotReady { .. } => "Not ready to start working",
            Self::Drive { .. } => "Not able to prepare network share",
        };
        Reason::new(user, self.tech_detail())
    }

    fn tech_detail(&self) -> String {
        match self {
            Self::AccessDenied {
                operation,
                target,
                detail,
            }
            | Self::NotFound {
                operation,
                target,
                detail,
            }
            | Self::Busy {
                operation,
                target,
                detail,
            } => format!("{self} ({operation} \"{target}\"): {detail}"),
            Self::Timeout {
                operation,
                timeout_ms,
            } => format!("{self} ({operation}): timeout after {timeout_ms}ms"),
            Self::Cancelled { operation } => format!("{self} ({operation})"),
            Self::UnsupportedOperation {
                operation,
                accessor_type,
            } => format!("{self}: {accessor_type}.{operation}"),
            Self::InternalConfig {
                field,
                reason,
                value,
            } => match value {
                Some(value) => format!("{self}: {field} {reason} (\"{value}\")"),
                None => format!("{self}: {field} {reason}"),
            },
            Self::Io {
                operation,
                path,
                source,
            } => format!("{self} ({operation} \"{}\"): {source}", path.display()),
            Self::Json {
                operation,
                location,
                source,
            } => format!("{self} ({operation} \"{location}\"): {source}"),
            Self::Http {
                operation,
                url,
                status,
                detail,
            } => match status {
                Some(status) => format!("{self} ({operation} {url}): status {status} {detail}"),
                None => format!("{self} ({operation} {url}): {detail}"),
            },
            Self::Process { program, detail } => format!("{self} ({program}): {detail}"),
            Self::NotReady {
                expectation_id,
                reason,
            } => format!("{self} ({expectation_id}): {}", reason.tech),
            Self::Drive { folder, source } => format!("{self} (\"{folder}\"): {source}"),
        }
    }
}

fn is_busy(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::ResourceBusy
        || (cfg!(windows) && error.raw_os_error() == Some(WINDOWS_SHARING_VIOLATION))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let missing = PackageError::io(
            "stat",
            "/media/report.mov",
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert!(missing.is_not_found());

        let denied = PackageError::io(
            "open",
            "/media/report.mov",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(denied.is_access_denied());

        let busy = PackageError::io(
            "open",
            "/media/report.mov",
            io::Error::from(io::ErrorKind::ResourceBusy),
        );
        assert!(matches!(busy, PackageError::Busy { .. }));

        let other = PackageError::io("read", "/media/report.mov", io::Error::other("boom"));
        assert!(matches!(other, PackageError::Io { .. }));
        assert!(other.source().is_some());
    }

    #[test]
    fn reason_keeps_raw_text_out_of_user_phrase() {
        let err = PackageError::io(
            "open",
            "/media/report.mov",
            io::Error::new(io::ErrorKind::PermissionDenied, "EPERM: operation not permitted"),
        );
        let reason = err.reason();
        assert_eq!(reason.user, "Not allowed to access package");
        assert!(!reason.user.contains("EPERM"));
        assert!(reason.tech.contains("EPERM: operation not permitted"));
        assert!(reason.tech.contains("/media/report.mov"));
    }

    #[test]
    fn unsupported_operation_names_backend() {
        let reason =
            PackageError::unsupported("put_package_info", AccessorType::LocalFolder).reason();
        assert_eq!(reason.user, "Operation not supported");
        assert!(reason.tech.contains("LOCAL_FOLDER.put_package_info"));
    }

    #[test]
    fn not_ready_keeps_the_lookup_reason() {
        let err = PackageError::NotReady {
            expectation_id: "copy-1".into(),
            reason: Reason::new("File doesn't exist", "ENOENT"),
        };
        let reason = err.reason();
        assert_eq!(reason.user, "Can't start working: File doesn't exist");
        assert_eq!(reason.tech, "Can't start working: ENOENT");
        assert!(err.source().is_some());
    }

    #[test]
    fn reason_prefix_applies_to_both_texts() {
        let reason = Reason::new("File doesn't exist", "ENOENT").prefixed("Not able to access source");
        assert_eq!(reason.user, "Not able to access source: File doesn't exist");
        assert_eq!(reason.tech, "Not able to access source: ENOENT");
        assert_eq!(reason.to_string(), reason.user);
    }
}
