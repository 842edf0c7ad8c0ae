//! `media_file_scan`: probe a file through the media tool and store the result
//! in the record store, keyed by the scanned container, content and version.
//!
//! # Design
//! - The record key always uses the first source container, so removal works
//!   without resolving a source.
//! - The stored hash is the fingerprint of the source as actually scanned; a
//!   changed file therefore invalidates the record.

use std::time::Instant;

use ferry_accessors::{CorePackageInfoHandle, HandleContent, PackageVersion};
use ferry_core::{
    Expectation, FileVersion, FulfilledOutcome, MediaFileScan, PackageError, PackageInfoKey,
    PackageResult, ReadyOutcome, Reason, RemovedOutcome, SupportOutcome, WorkInProgress,
};

use super::{
    HandlerContext, PATH_ACCESSORS, RECORD_ACCESSORS, failed, location_of, not_ready, ready_reason,
};
use crate::lifecycle::{launch, seconds};
use crate::lookup::{LookupMode, ResolvedAccessor, lookup_accessor};

fn source_mode(scan: &MediaFileScan) -> LookupMode {
    LookupMode::Read {
        expected_version: Some(PackageVersion::File(scan.start_requirement.version.clone())),
    }
}

fn record_key(scan: &MediaFileScan) -> Result<PackageInfoKey, Reason> {
    let container = scan
        .start_requirement
        .sources
        .first()
        .ok_or_else(|| Reason::plain("No source found"))?;
    Ok(PackageInfoKey::new(
        container.container_id.clone(),
        scan.start_requirement.content.clone(),
        scan.start_requirement.version.clone(),
    ))
}

fn records(target: &ResolvedAccessor) -> Result<&CorePackageInfoHandle, Reason> {
    target.handle.as_core_package_info().ok_or_else(|| {
        Reason::new(
            "There is an internal issue in Package Manager",
            format!("Accessor \"{}\" is not a record store", target.accessor_id),
        )
    })
}

fn file_version(version: PackageVersion) -> Result<FileVersion, Reason> {
    match version {
        PackageVersion::File(version) => Ok(version),
        PackageVersion::Clip(_) => Err(Reason::new(
            "Source is not a file",
            "source accessor reported a clip version",
        )),
    }
}

async fn lookup_source(
    ctx: &HandlerContext,
    expectation: &Expectation,
    scan: &MediaFileScan,
) -> Result<ResolvedAccessor, Reason> {
    lookup_accessor(
        &ctx.accessors,
        &scan.start_requirement.sources,
        PATH_ACCESSORS,
        &HandleContent::File(scan.start_requirement.content.clone()),
        expectation.work_options,
        &source_mode(scan),
    )
    .await
}

async fn lookup_target(
    ctx: &HandlerContext,
    expectation: &Expectation,
    scan: &MediaFileScan,
    mode: &LookupMode,
) -> Result<ResolvedAccessor, Reason> {
    lookup_accessor(
        &ctx.accessors,
        &scan.end_requirement.targets,
        RECORD_ACCESSORS,
        &HandleContent::File(scan.end_requirement.content.clone()),
        expectation.work_options,
        mode,
    )
    .await
}

pub(crate) fn support(ctx: &HandlerContext, expectation: &Expectation) -> SupportOutcome {
    ctx.support(expectation, PATH_ACCESSORS, RECORD_ACCESSORS)
}

pub(crate) async fn cost(
    ctx: &HandlerContext,
    expectation: &Expectation,
    scan: &MediaFileScan,
) -> PackageResult<u64> {
    let size = scan.start_requirement.version.file_size;
    let source_type = match lookup_source(ctx, expectation, scan).await {
        Ok(source) => source.handle.accessor_type(),
        Err(_) => ctx.fallback_source_type(expectation, PATH_ACCESSORS)?,
    };
    Ok(ctx.costs.estimate(source_type, size, true))
}

pub(crate) async fn ready(
    ctx: &HandlerContext,
    expectation: &Expectation,
    scan: &MediaFileScan,
) -> ReadyOutcome {
    if let Err(waiting) = ctx.dependencies_ready(expectation) {
        return waiting;
    }
    let source = match lookup_source(ctx, expectation, scan).await {
        Ok(source) => source,
        Err(reason) => {
            return ReadyOutcome::not_ready(reason.prefixed("Not able to access source"), Some(false));
        }
    };
    if let Err(reason) = source.handle.try_package_read().await {
        return ReadyOutcome::not_ready(reason, Some(true));
    }
    let target = match lookup_target(ctx, expectation, scan, &LookupMode::Write).await {
        Ok(target) => target,
        Err(reason) => {
            return ReadyOutcome::not_ready(reason.prefixed("Not able to access target"), Some(true));
        }
    };
    ReadyOutcome::ready(ready_reason(
        &source.describe(&source_mode(scan)),
        &target.describe(&LookupMode::Write),
    ))
}

pub(crate) async fn fulfilled(
    ctx: &HandlerContext,
    expectation: &Expectation,
    scan: &MediaFileScan,
) -> FulfilledOutcome {
    let target = match lookup_target(ctx, expectation, scan, &LookupMode::read()).await {
        Ok(target) => target,
        Err(reason) => {
            return FulfilledOutcome::not_fulfilled(reason.prefixed("Not able to access target"));
        }
    };
    let source = match lookup_source(ctx, expectation, scan).await {
        Ok(source) => source,
        Err(reason) => {
            return FulfilledOutcome::not_fulfilled(reason.prefixed("Not able to access source"));
        }
    };
    let checked = async {
        let key = record_key(scan)?;
        let store = records(&target)?;
        let actual = source
            .handle
            .get_package_actual_version()
            .await
            .map_err(failed("Source package"))
            .and_then(file_version)?;
        let stored = store
            .fetch_package_info_hash(&key)
            .await
            .map_err(failed("Not able to read record"))?;
        Ok::<_, Reason>((stored, actual.fingerprint()))
    };
    match checked.await {
        Err(reason) => FulfilledOutcome::not_fulfilled(reason),
        Ok((None, _)) => FulfilledOutcome::not_fulfilled(Reason::plain("No Record found")),
        Ok((Some(stored), actual)) if stored != actual => FulfilledOutcome::not_fulfilled(Reason::new(
            "Record doesn't match file",
            format!("Record hash \"{stored}\" differs from file \"{actual}\""),
        )),
        Ok(_) => FulfilledOutcome::fulfilled(Reason::plain("Record already matches file")),
    }
}

pub(crate) async fn work(
    ctx: &HandlerContext,
    expectation: &Expectation,
    scan: &MediaFileScan,
) -> PackageResult<WorkInProgress> {
    let source = lookup_source(ctx, expectation, scan)
        .await
        .map_err(|reason| not_ready(expectation, "Not able to access source", &reason))?;
    let target = lookup_target(ctx, expectation, scan, &LookupMode::Write)
        .await
        .map_err(|reason| not_ready(expectation, "Not able to access target", &reason))?;
    let key = record_key(scan).map_err(|reason| not_ready(expectation, "Not able to access source", &reason))?;
    let probe = ctx.probe.clone();

    Ok(launch(
        expectation,
        ctx.events(),
        ctx.metrics.as_ref(),
        move |control| async move {
            let started = Instant::now();
            let version = source
                .handle
                .get_package_actual_version()
                .await
                .map_err(failed("Source package"))
                .and_then(file_version)?;
            let path = source
                .handle
                .local_package_path()
                .await
                .map_err(failed("Not able to read source"))?;
            control.report_progress(0.1);

            let scanned = probe
                .probe(&path, control.cancellation())
                .await
                .map_err(|err| err.reason())?;
            control.report_progress(0.9);

            records(&target)?
                .store_package_info(&key, &version.fingerprint(), scanned)
                .await
                .map_err(failed("Not able to store scan result"))?;
            Ok(Reason::new(
                format!("Scan completed in {}", seconds(started.elapsed())),
                format!(
                    "Scanned {} and stored the result in {}",
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
    scan: &MediaFileScan,
) -> RemovedOutcome {
    let target = match lookup_target(ctx, expectation, scan, &LookupMode::Write).await {
        Ok(target) => target,
        Err(reason) => {
            return RemovedOutcome::not_removed(reason.prefixed("Not able to access target"));
        }
    };
    let removed = async {
        let key = record_key(scan)?;
        records(&target)?
            .remove_package_info(&key)
            .await
            .map_err(|err: PackageError| err.reason().prefixed("Not able to remove scan info"))
    };
    match removed.await {
        Ok(()) => {
            ctx.registry.remove(&expectation.id);
            RemovedOutcome::removed(Reason::plain("Removed scan info from Store"))
        }
        Err(reason) => RemovedOutcome::not_removed(reason),
    }
}
