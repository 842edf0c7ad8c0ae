//! Per-type expectation handlers.
//!
//! Each module implements the bidding protocol for one expectation type; the
//! worker dispatches to them with an exhaustive `match` over the type.

use ferry_accessors::{AccessorContext, supports_access};
use ferry_core::{
    AccessorType, Expectation, PackageContainerOnPackage, PackageError, ReadyOutcome, Reason,
    SupportOutcome,
};
use ferry_events::EventBus;
use ferry_telemetry::Metrics;

use crate::cost::CostModel;
use crate::lookup::ResolvedAccessor;
use crate::probe::MediaProbe;
use crate::registry::ExpectationRegistry;

pub(crate) mod media_file_copy;
pub(crate) mod media_file_scan;
pub(crate) mod tape_clip_copy;

/// Backends that can hold a file package.
pub(crate) const FILE_ACCESSORS: &[AccessorType] = &[
    AccessorType::LocalFolder,
    AccessorType::MappedDrive,
    AccessorType::FileShare,
    AccessorType::Http,
];

/// Backends that expose a filesystem path for external tools.
pub(crate) const PATH_ACCESSORS: &[AccessorType] = &[
    AccessorType::LocalFolder,
    AccessorType::MappedDrive,
    AccessorType::FileShare,
];

/// Record stores receiving scan results.
pub(crate) const RECORD_ACCESSORS: &[AccessorType] = &[AccessorType::CorePackageInfo];

/// Tape archives.
pub(crate) const TAPE_ACCESSORS: &[AccessorType] = &[AccessorType::Tape];

/// Collaborators shared by every handler.
#[derive(Clone)]
pub(crate) struct HandlerContext {
    pub(crate) accessors: AccessorContext,
    pub(crate) registry: ExpectationRegistry,
    pub(crate) costs: CostModel,
    pub(crate) probe: MediaProbe,
    pub(crate) metrics: Option<Metrics>,
}

impl HandlerContext {
    pub(crate) const fn events(&self) -> &EventBus {
        self.accessors.events()
    }

    /// Support answer for an expectation whose sources and targets must offer
    /// a reachable accessor of the given types.
    pub(crate) fn support(
        &self,
        expectation: &Expectation,
        source_types: &[AccessorType],
        target_types: &[AccessorType],
    ) -> SupportOutcome {
        if first_supported_type(&self.accessors, expectation.sources(), source_types).is_none() {
            return SupportOutcome::unsupported(Reason::new(
                "Source not supported",
                format!(
                    "No source of \"{}\" has an accessor this worker can use",
                    expectation.id
                ),
            ));
        }
        if first_supported_type(&self.accessors, expectation.targets(), target_types).is_none() {
            return SupportOutcome::unsupported(Reason::new(
                "Target not supported",
                format!(
                    "No target of \"{}\" has an accessor this worker can use",
                    expectation.id
                ),
            ));
        }
        SupportOutcome::supported(Reason::plain("Worker supports the expectation"))
    }

    /// Dependency gate shared by every readiness check.
    pub(crate) fn dependencies_ready(&self, expectation: &Expectation) -> Result<(), ReadyOutcome> {
        self.registry
            .dependencies_fulfilled(expectation)
            .map_err(|reason| ReadyOutcome::not_ready(reason, None))
    }

    /// Backend type used for costing when no source could be resolved.
    pub(crate) fn fallback_source_type(
        &self,
        expectation: &Expectation,
        source_types: &[AccessorType],
    ) -> Result<AccessorType, PackageError> {
        first_supported_type(&self.accessors, expectation.sources(), source_types).ok_or_else(|| {
            PackageError::NotReady {
                expectation_id: expectation.id.clone(),
                reason: Reason::plain("No supported source accessor"),
            }
        })
    }
}

/// Type of the first accessor, in declaration order, this worker can reach.
pub(crate) fn first_supported_type(
    ctx: &AccessorContext,
    containers: &[PackageContainerOnPackage],
    accessor_types: &[AccessorType],
) -> Option<AccessorType> {
    containers
        .iter()
        .flat_map(|container| container.accessors.values())
        .find(|accessor| {
            accessor_types.contains(&accessor.accessor_type)
                && supports_access(ctx.location(), accessor)
        })
        .map(|accessor| accessor.accessor_type)
}

/// Setup error for a lookup that failed when work was requested.
pub(crate) fn not_ready(expectation: &Expectation, prefix: &str, reason: &Reason) -> PackageError {
    PackageError::NotReady {
        expectation_id: expectation.id.clone(),
        reason: reason.prefixed(prefix),
    }
}

/// Readiness reason naming both resolved ends.
pub(crate) fn ready_reason(source: &Reason, target: &Reason) -> Reason {
    Reason::new(
        format!("{}, {}", source.user, target.user),
        format!("{}, {}", source.tech, target.tech),
    )
}

/// Display name of a resolved accessor for completion summaries.
pub(crate) fn location_of(resolved: &ResolvedAccessor) -> String {
    format!("{} ({})", resolved.container_label, resolved.accessor_id)
}

/// Error text with the failing step named.
pub(crate) fn failed(step: &str) -> impl Fn(PackageError) -> Reason + '_ {
    move |err| err.reason().prefixed(step)
}
