//! `media_file_copy`: stream a file from the first readable source to the first
//! writable target and record the source version next to the copy.

use std::time::Instant;

use ferry_accessors::{HandleContent, PackageVersion};
use ferry_core::{
    Expectation, FileVersion, FulfilledOutcome, MediaFileCopy, PackageResult, ReadyOutcome, Reason,
    RemovedOutcome, SupportOutcome, WorkInProgress, compare_file_version,
};
use serde_json::Value;
use tracing::debug;

use super::{FILE_ACCESSORS, HandlerContext, failed, location_of, not_ready, ready_reason};
use crate::lifecycle::{ProgressReader, launch, seconds};
use crate::lookup::{LookupMode, ResolvedAccessor, lookup_accessor};

fn content(copy: &MediaFileCopy) -> HandleContent {
    HandleContent::File(copy.end_requirement.content.clone())
}

fn source_mode(copy: &MediaFileCopy) -> LookupMode {
    LookupMode::Read {
        expected_version: Some(PackageVersion::File(copy.end_requirement.version.clone())),
    }
}

async fn lookup_source(
    ctx: &HandlerContext,
    expectation: &Expectation,
    copy: &MediaFileCopy,
) -> Result<ResolvedAccessor, Reason> {
    lookup_accessor(
        &ctx.accessors,
        &copy.start_requirement.sources,
        FILE_ACCESSORS,
        &content(copy),
        expectation.work_options,
        &source_mode(copy),
    )
    .await
}

async fn lookup_target(
    ctx: &HandlerContext,
    expectation: &Expectation,
    copy: &MediaFileCopy,
    mode: &LookupMode,
) -> Result<ResolvedAccessor, Reason> {
    lookup_accessor(
        &ctx.accessors,
        &copy.end_requirement.targets,
        FILE_ACCESSORS,
        &content(copy),
        expectation.work_options,
        mode,
    )
    .await
}

pub(crate) fn support(ctx: &HandlerContext, expectation: &Expectation) -> SupportOutcome {
    ctx.support(expectation, FILE_ACCESSORS, FILE_ACCESSORS)
}

pub(crate) async fn cost(
    ctx: &HandlerContext,
    expectation: &Expectation,
    copy: &MediaFileCopy,
) -> PackageResult<u64> {
    let expected_size = copy.end_requirement.version.file_size;
    let Ok(source) = lookup_source(ctx, expectation, copy).await else {
        let source_type = ctx.fallback_source_type(expectation, FILE_ACCESSORS)?;
        return Ok(ctx.costs.estimate(source_type, expected_size, false));
    };
    let size = match expected_size {
        Some(size) => Some(size),
        None => source
            .handle
            .get_package_actual_version()
            .await
            .ok()
            .and_then(|version| version.as_file().and_then(|file| file.file_size)),
    };
    Ok(ctx.costs.estimate(source.handle.accessor_type(), size, false))
}

pub(crate) async fn ready(
    ctx: &HandlerContext,
    expectation: &Expectation,
    copy: &MediaFileCopy,
) -> ReadyOutcome {
    if let Err(waiting) = ctx.dependencies_ready(expectation) {
        return waiting;
    }
    let source = match lookup_source(ctx, expectation, copy).await {
        Ok(source) => source,
        Err(reason) => {
            return ReadyOutcome::not_ready(reason.prefixed("Not able to access source"), Some(false));
        }
    };
    if let Err(reason) = source.handle.try_package_read().await {
        return ReadyOutcome::not_ready(reason, Some(true));
    }
    let target = match lookup_target(ctx, expectation, copy, &LookupMode::Write).await {
        Ok(target) => target,
        Err(reason) => {
            return ReadyOutcome::not_ready(reason.prefixed("Not able to access target"), Some(true));
        }
    };
    ReadyOutcome::ready(ready_reason(
        &source.describe(&source_mode(copy)),
        &target.describe(&LookupMode::Write),
    ))
}

pub(crate) async fn fulfilled(
    ctx: &HandlerContext,
    expectation: &Expectation,
    copy: &MediaFileCopy,
) -> FulfilledOutcome {
    let target = match lookup_target(ctx, expectation, copy, &LookupMode::read()).await {
        Ok(target) => target,
        Err(reason) => {
            return FulfilledOutcome::not_fulfilled(reason.prefixed("Not able to access target"));
        }
    };
    let source = match lookup_source(ctx, expectation, copy).await {
        Ok(source) => source,
        Err(reason) => {
            return FulfilledOutcome::not_fulfilled(reason.prefixed("Not able to access source"));
        }
    };
    let source_version = match source.handle.get_package_actual_version().await {
        Ok(PackageVersion::File(version)) => version,
        Ok(PackageVersion::Clip(_)) => {
            return FulfilledOutcome::not_fulfilled(Reason::new(
                "Source is not a file",
                "source accessor reported a clip version",
            ));
        }
        Err(err) => return FulfilledOutcome::not_fulfilled(err.reason().prefixed("Source package")),
    };
    let stored = match target.handle.fetch_metadata().await {
        Ok(Some(stored)) => stored,
        Ok(None) => {
            return FulfilledOutcome::not_fulfilled(Reason::plain("Target package: Metadata missing"));
        }
        Err(err) => return FulfilledOutcome::not_fulfilled(err.reason().prefixed("Target package")),
    };
    let stored: FileVersion = match serde_json::from_value(stored) {
        Ok(version) => version,
        Err(err) => {
            return FulfilledOutcome::not_fulfilled(Reason::new(
                "Target package: Metadata unreadable",
                format!("Target package: Metadata unreadable: {err}"),
            ));
        }
    };
    if let Some(mismatch) = compare_file_version(&source_version, &stored) {
        return FulfilledOutcome::not_fulfilled(mismatch.prefixed("Target package"));
    }
    if let Err(err) = target.handle.package_is_in_place().await {
        debug!(expectation_id = %expectation.id, error = %err.reason().tech, "failed to clear pending removal");
    }
    FulfilledOutcome::fulfilled(Reason::plain(format!(
        "File already copied to \"{}\"",
        target.container_label
    )))
}

pub(crate) async fn work(
    ctx: &HandlerContext,
    expectation: &Expectation,
    copy: &MediaFileCopy,
) -> PackageResult<WorkInProgress> {
    let source = lookup_source(ctx, expectation, copy)
        .await
        .map_err(|reason| not_ready(expectation, "Not able to access source", &reason))?;
    let target = lookup_target(ctx, expectation, copy, &LookupMode::Write)
        .await
        .map_err(|reason| not_ready(expectation, "Not able to access target", &reason))?;

    Ok(launch(
        expectation,
        ctx.events(),
        ctx.metrics.as_ref(),
        move |control| async move {
            let started = Instant::now();
            let version = match source
                .handle
                .get_package_actual_version()
                .await
                .map_err(failed("Source package"))?
            {
                PackageVersion::File(version) => version,
                PackageVersion::Clip(_) => {
                    return Err(Reason::new(
                        "Source is not a file",
                        "source accessor reported a clip version",
                    ));
                }
            };
            let stream = source
                .handle
                .get_package_read_stream()
                .await
                .map_err(failed("Not able to read source"))?;
            let reader = ProgressReader::new(stream.reader, stream.size, control.clone());
            let bytes = target
                .handle
                .put_package_stream(Box::new(reader))
                .await
                .map_err(failed("Not able to write target"))?
                .finished_unless(control.cancellation())
                .await
                .map_err(failed("Copy failed"))?;
            target
                .handle
                .finalize_package()
                .await
                .map_err(failed("Not able to finalize target"))?;
            let metadata: Value = serde_json::to_value(&version).map_err(|err| {
                Reason::new("Not able to store metadata", format!("Not able to store metadata: {err}"))
            })?;
            target
                .handle
                .update_metadata(&metadata)
                .await
                .map_err(failed("Not able to store metadata"))?;
            target
                .handle
                .package_is_in_place()
                .await
                .map_err(failed("Not able to store metadata"))?;
            Ok(Reason::new(
                format!("Copy completed in {}", seconds(started.elapsed())),
                format!(
                    "Copied {bytes} bytes from {} to {}",
                    location_of(&source),
                    location_of(&target)
                ),
            ))
        },
    ))
}

pub(crate) async fn remove(
    ctx: &HandlerContext,
    expectation: &Expectation,
    copy: &MediaFileCopy,
) -> RemovedOutcome {
    let target = match lookup_target(ctx, expectation, copy, &LookupMode::Write).await {
        Ok(target) => target,
        Err(reason) => {
            return RemovedOutcome::not_removed(reason.prefixed("Not able to access target"));
        }
    };
    if let Err(err) = target.handle.remove_package().await {
        return RemovedOutcome::not_removed(err.reason().prefixed("Not able to remove file"));
    }
    ctx.registry.remove(&expectation.id);
    let summary = if expectation.work_options.remove_delay.is_some_and(|delay| delay > 0) {
        "File scheduled for removal"
    } else {
        "File removed"
    };
    RemovedOutcome::removed(Reason::plain(format!(
        "{summary} from \"{}\"",
        target.container_label
    )))
}
