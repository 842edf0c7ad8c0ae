//! Whether this worker can reach an accessor at all.

use ferry_config::LocationConfig;
use ferry_core::{AccessorOnPackage, AccessorType};

/// True when the worker at `location` can use `accessor`.
///
/// Machine-local accessors must name this computer; network accessors must be
/// unscoped or scoped to a network the worker is on.
#[must_use]
pub fn supports_access(location: &LocationConfig, accessor: &AccessorOnPackage) -> bool {
    match accessor.accessor_type {
        AccessorType::LocalFolder | AccessorType::MappedDrive => accessor
            .resource_id
            .as_deref()
            .is_some_and(|id| same_resource(id, &location.local_computer_id)),
        AccessorType::FileShare | AccessorType::Http | AccessorType::Tape => accessor
            .network_id
            .as_deref()
            .is_none_or(|id| location.local_network_ids.iter().any(|local| local == id)),
        AccessorType::CorePackageInfo => true,
    }
}

fn same_resource(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}
