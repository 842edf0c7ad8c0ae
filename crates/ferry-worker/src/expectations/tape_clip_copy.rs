//! `tape_clip_copy`: copy a clip between tape archives through the gateway.

use std::time::Instant;

use ferry_accessors::{HandleContent, PackageVersion};
use ferry_core::{
    ClipVersion, Expectation, FulfilledOutcome, PackageResult, ReadyOutcome, Reason, RemovedOutcome,
    SupportOutcome, TapeClipCopy, WorkInProgress,
};

use super::{HandlerContext, TAPE_ACCESSORS, failed, location_of, not_ready, ready_reason};
use crate::lifecycle::{launch, seconds};
use crate::lookup::{LookupMode, ResolvedAccessor, lookup_accessor};

fn content(copy: &TapeClipCopy) -> HandleContent {
    HandleContent::Clip(copy.end_requirement.content.clone())
}

fn source_mode(copy: &TapeClipCopy) -> LookupMode {
    LookupMode::Read {
        expected_version: Some(PackageVersion::Clip(copy.end_requirement.version.clone())),
    }
}

async fn lookup(
    ctx: &HandlerContext,
    expectation: &Expectation,
    copy: &TapeClipCopy,
    source: bool,
    mode: &LookupMode,
) -> Result<ResolvedAccessor, Reason> {
    let containers = if source {
        &copy.start_requirement.sources
    } else {
        &copy.end_requirement.targets
    };
    lookup_accessor(
        &ctx.accessors,
        containers,
        TAPE_ACCESSORS,
        &content(copy),
        expectation.work_options,
        mode,
    )
    .await
}

async fn clip_version(resolved: &ResolvedAccessor, side: &str) -> Result<ClipVersion, Reason> {
    match resolved.handle.get_package_actual_version().await {
        Ok(PackageVersion::Clip(version)) => Ok(version),
        Ok(PackageVersion::File(_)) => Err(Reason::new(
            "Package is of the wrong kind",
            format!("{side} accessor reported a file version"),
        )),
        Err(err) => Err(err.reason().prefixed(side)),
    }
}

/// A target clip is the copy of `source` when it shares its lineage and length.
fn copied_from(target: &ClipVersion, source: &ClipVersion) -> Option<Reason> {
    let lineage = source.clone_id.or(source.clip_id);
    if target.clone_id != lineage {
        return Some(Reason::new(
            "Target clip is not a copy of the source",
            format!(
                "Target clone id {:?} differs from source lineage {lineage:?}",
                target.clone_id
            ),
        ));
    }
    if target.frames != source.frames {
        return Some(Reason::new(
            "Target clip is incomplete",
            format!(
                "Target has {:?} frames, source has {:?}",
                target.frames, source.frames
            ),
        ));
    }
    None
}

pub(crate) fn support(ctx: &HandlerContext, expectation: &Expectation) -> SupportOutcome {
    ctx.support(expectation, TAPE_ACCESSORS, TAPE_ACCESSORS)
}

pub(crate) async fn cost(
    ctx: &HandlerContext,
    expectation: &Expectation,
    copy: &TapeClipCopy,
) -> PackageResult<u64> {
    let source_type = match lookup(ctx, expectation, copy, true, &source_mode(copy)).await {
        Ok(source) => source.handle.accessor_type(),
        Err(_) => ctx.fallback_source_type(expectation, TAPE_ACCESSORS)?,
    };
    Ok(ctx.costs.estimate(source_type, None, false))
}

pub(crate) async fn ready(
    ctx: &HandlerContext,
    expectation: &Expectation,
    copy: &TapeClipCopy,
) -> ReadyOutcome {
    if let Err(waiting) = ctx.dependencies_ready(expectation) {
        return waiting;
    }
    let source = match lookup(ctx, expectation, copy, true, &source_mode(copy)).await {
        Ok(source) => source,
        Err(reason) => {
            return ReadyOutcome::not_ready(reason.prefixed("Not able to access source"), Some(false));
        }
    };
    let target = match lookup(ctx, expectation, copy, false, &LookupMode::Write).await {
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
    copy: &TapeClipCopy,
) -> FulfilledOutcome {
    let target = match lookup(ctx, expectation, copy, false, &LookupMode::read()).await {
        Ok(target) => target,
        Err(reason) => {
            return FulfilledOutcome::not_fulfilled(reason.prefixed("Not able to access target"));
        }
    };
    let source = match lookup(ctx, expectation, copy, true, &source_mode(copy)).await {
        Ok(source) => source,
        Err(reason) => {
            return FulfilledOutcome::not_fulfilled(reason.prefixed("Not able to access source"));
        }
    };
    let versions = async {
        Ok::<_, Reason>((
            clip_version(&source, "Source clip").await?,
            clip_version(&target, "Target clip").await?,
        ))
    };
    match versions.await {
        Err(reason) => FulfilledOutcome::not_fulfilled(reason),
        Ok((source_version, target_version)) => match copied_from(&target_version, &source_version) {
            Some(mismatch) => FulfilledOutcome::not_fulfilled(mismatch),
            None => FulfilledOutcome::fulfilled(Reason::plain(format!(
                "Clip already copied to \"{}\"",
                target.container_label
            ))),
        },
    }
}

pub(crate) async fn work(
    ctx: &HandlerContext,
    expectation: &Expectation,
    copy: &TapeClipCopy,
) -> PackageResult<WorkInProgress> {
    let source = lookup(ctx, expectation, copy, true, &source_mode(copy))
        .await
        .map_err(|reason| not_ready(expectation, "Not able to access source", &reason))?;
    let target = lookup(ctx, expectation, copy, false, &LookupMode::Write)
        .await
        .map_err(|reason| not_ready(expectation, "Not able to access target", &reason))?;

    Ok(launch(
        expectation,
        ctx.events(),
        ctx.metrics.as_ref(),
        move |control| async move {
            let started = Instant::now();
            let info = source
                .handle
                .get_package_read_info()
                .await
                .map_err(failed("Not able to read source clip"))?;
            control.report_progress(0.1);
            let frames = target
                .handle
                .put_package_info(info)
                .await
                .map_err(failed("Not able to start clip copy"))?
                .finished_unless(control.cancellation())
                .await
                .map_err(failed("Clip copy failed"))?;
            Ok(Reason::new(
                format!("Clip copy completed in {}", seconds(started.elapsed())),
                format!(
                    "Copied {frames} frames from {} to {}",
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
    copy: &TapeClipCopy,
) -> RemovedOutcome {
    let target = match lookup(ctx, expectation, copy, false, &LookupMode::Write).await {
        Ok(target) => target,
        Err(reason) => {
            return RemovedOutcome::not_removed(reason.prefixed("Not able to access target"));
        }
    };
    if let Err(err) = target.handle.remove_package().await {
        return RemovedOutcome::not_removed(err.reason().prefixed("Not able to remove clip"));
    }
    ctx.registry.remove(&expectation.id);
    RemovedOutcome::removed(Reason::plain(format!(
        "Removed clip from \"{}\"",
        target.container_label
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_share_lineage_and_length() {
        let source = ClipVersion {
            clip_id: Some(7),
            frames: Some(250),
            ..ClipVersion::default()
        };
        let copy = ClipVersion {
            clip_id: Some(42),
            frames: Some(250),
            clone_id: Some(7),
            ..ClipVersion::default()
        };
        assert!(copied_from(&copy, &source).is_none());

        let unrelated = ClipVersion {
            clone_id: None,
            ..copy.clone()
        };
        assert_eq!(
            copied_from(&unrelated, &source).map(|reason| reason.user),
            Some("Target clip is not a copy of the source".to_string())
        );

        let short = ClipVersion {
            frames: Some(100),
            ..copy
        };
        assert_eq!(
            copied_from(&short, &source).map(|reason| reason.user),
            Some("Target clip is incomplete".to_string())
        );
    }
}
