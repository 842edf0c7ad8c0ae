//! Resolution of an expectation's sources and targets to usable accessor handles.
//!
//! # Design
//! - Containers are visited in list order and accessors in declaration order;
//!   the first accessor whose checks all pass wins.
//! - A failure replaces the previous failure reason, so the caller sees the
//!   last thing that went wrong when nothing resolves.
//! - Read lookups optionally verify the observed version against the expected one.
//!   When the expected version carries a SHA-256 checksum the package bytes are
//!   hashed; other checksum algorithms fall back to size and modification time.

use ferry_accessors::{AccessorContext, AccessorHandle, HandleContent, PackageVersion, supports_access};
use ferry_core::{
    AccessResult, AccessorType, PackageContainerOnPackage, Reason, WorkOptions, compare_clip_version,
    compare_file_version,
};
use tracing::debug;

/// What the resolved accessor must allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupMode {
    /// The package must exist, be readable and, when given, match the version.
    Read {
        /// Version the package is expected to have.
        expected_version: Option<PackageVersion>,
    },
    /// The container must accept writes.
    Write,
}

impl LookupMode {
    /// Read lookup without a version check.
    #[must_use]
    pub const fn read() -> Self {
        Self::Read {
            expected_version: None,
        }
    }

    const fn noun(&self) -> &'static str {
        match self {
            Self::Read { .. } => "source",
            Self::Write => "target",
        }
    }
}

/// An accessor that passed every check of its lookup.
#[derive(Debug)]
pub struct ResolvedAccessor {
    /// Handle ready for use.
    pub handle: AccessorHandle,
    /// Container the accessor belongs to.
    pub container_id: String,
    /// Display label of that container.
    pub container_label: String,
    /// Accessor id within the container.
    pub accessor_id: String,
}

impl ResolvedAccessor {
    /// Explanation naming where the package was found.
    #[must_use]
    pub fn describe(&self, mode: &LookupMode) -> Reason {
        Reason::plain(format!(
            "Can access {} \"{}\" through accessor \"{}\"",
            mode.noun(),
            self.container_label,
            self.accessor_id
        ))
    }
}

/// Resolve the first usable accessor of one of `accessor_types` across `containers`.
///
/// # Errors
///
/// Returns the last failure reason when no accessor passes.
pub async fn lookup_accessor(
    ctx: &AccessorContext,
    containers: &[PackageContainerOnPackage],
    accessor_types: &[AccessorType],
    content: &HandleContent,
    work_options: WorkOptions,
    mode: &LookupMode,
) -> Result<ResolvedAccessor, Reason> {
    let mut last_failure = Reason::plain(format!("No {} found", mode.noun()));
    for container in containers {
        for (accessor_id, accessor) in &container.accessors {
            if !accessor_types.contains(&accessor.accessor_type)
                || !supports_access(ctx.location(), accessor)
            {
                last_failure = Reason::new(
                    format!("Accessor \"{accessor_id}\" not supported"),
                    format!(
                        "Unsupported accessor \"{accessor_id}\" type \"{}\" in \"{}\"",
                        accessor.accessor_type, container.label
                    ),
                );
                continue;
            }
            let handle = match AccessorHandle::new(
                ctx,
                accessor_id,
                accessor,
                content.clone(),
                work_options,
            ) {
                Ok(handle) => handle,
                Err(err) => {
                    last_failure = err.reason();
                    continue;
                }
            };
            match check(&handle, mode).await {
                Ok(()) => {
                    debug!(
                        container = %container.container_id,
                        accessor = %accessor_id,
                        mode = mode.noun(),
                        "accessor resolved"
                    );
                    return Ok(ResolvedAccessor {
                        handle,
                        container_id: container.container_id.clone(),
                        container_label: container.label.clone(),
                        accessor_id: accessor_id.clone(),
                    });
                }
                Err(reason) => {
                    debug!(
                        container = %container.container_id,
                        accessor = %accessor_id,
                        reason = %reason.tech,
                        "accessor rejected"
                    );
                    last_failure = reason;
                }
            }
        }
    }
    Err(last_failure)
}

async fn check(handle: &AccessorHandle, mode: &LookupMode) -> AccessResult {
    match mode {
        LookupMode::Read { expected_version } => {
            handle.check_handle_read()?;
            handle.check_package_read_access().await?;
            if let Some(expected) = expected_version {
                let mut actual = handle
                    .get_package_actual_version()
                    .await
                    .map_err(|err| err.reason())?;
                complete_checksum(handle, &mut actual, expected)
                    .await
                    .map_err(|err| err.reason())?;
                if let Some(mismatch) = version_mismatch(&actual, expected) {
                    return Err(mismatch);
                }
            }
            Ok(())
        }
        LookupMode::Write => {
            handle.check_handle_write()?;
            handle.check_package_container_write_access().await
        }
    }
}

async fn complete_checksum(
    handle: &AccessorHandle,
    actual: &mut PackageVersion,
    expected: &PackageVersion,
) -> ferry_core::PackageResult<()> {
    let (PackageVersion::File(actual), PackageVersion::File(expected)) = (actual, expected) else {
        return Ok(());
    };
    let (None, Some(_), Some(kind)) = (&actual.checksum, &expected.checksum, expected.checksum_type)
    else {
        return Ok(());
    };
    if let Some(checksum) = handle.get_package_checksum(kind).await? {
        actual.checksum = Some(checksum);
        actual.checksum_type = Some(kind);
    }
    Ok(())
}

fn version_mismatch(actual: &PackageVersion, expected: &PackageVersion) -> Option<Reason> {
    match (actual, expected) {
        (PackageVersion::File(actual), PackageVersion::File(expected)) => {
            compare_file_version(actual, expected)
        }
        (PackageVersion::Clip(actual), PackageVersion::Clip(expected)) => {
            compare_clip_version(actual, expected)
        }
        (PackageVersion::File(_), PackageVersion::Clip(_))
        | (PackageVersion::Clip(_), PackageVersion::File(_)) => Some(Reason::new(
            "Package is of the wrong kind",
            "actual and expected versions describe different package kinds",
        )),
    }
}
