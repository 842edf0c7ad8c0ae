//! End-to-end protocol runs against temporary folders and in-memory backends.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Result, bail};
use ferry_accessors::AccessorContext;
use ferry_core::{
    AccessorOnPackage, ExpectationWorker, FileContent, FileVersion, PackageContainerOnPackage,
    PackageError, PackageInfoKey, WorkOutcome,
};
use ferry_events::{Event, EventBus};
use ferry_telemetry::Metrics;
use ferry_test_support::fixtures::{
    core_info_container, folder_of, local_container, location, media_file_copy, tape_clip_copy,
    tape_container, temp_folder, write_file,
};
use ferry_test_support::mocks::{MemoryPackageInfoStore, MemoryTapeGateway};
use ferry_worker::{MediaProbe, PackageWorker};

fn worker(events: &EventBus) -> PackageWorker {
    PackageWorker::new(
        "worker-a",
        AccessorContext::new(location("studio-lan"), events.clone()),
    )
}

fn share_container(container_id: &str, folder: &str) -> PackageContainerOnPackage {
    PackageContainerOnPackage::new(container_id, container_id).with_accessor(
        "share",
        AccessorOnPackage::file_share(folder, Some("studio-lan".to_string()))
            .readable()
            .writable(),
    )
}

fn set_modified_millis(path: &Path, millis: u64) -> Result<()> {
    let modified: SystemTime = UNIX_EPOCH + Duration::from_millis(millis);
    File::options().write(true).open(path)?.set_modified(modified)?;
    Ok(())
}

fn completed(outcome: WorkOutcome) -> Result<()> {
    match outcome {
        WorkOutcome::Completed { .. } => Ok(()),
        other => bail!("work did not complete: {other:?}"),
    }
}

#[tokio::test]
async fn copy_to_share_runs_the_full_protocol() -> Result<()> {
    let ingest = temp_folder()?;
    let playout = temp_folder()?;
    let events = EventBus::new();
    let worker = worker(&events);
    let copy = media_file_copy(
        "copy-report",
        local_container("ingest", &folder_of(&ingest)),
        share_container("playout", &folder_of(&playout)),
        "report.mov",
        FileVersion::default(),
    );

    assert!(worker.do_you_support_expectation(&copy).support);
    let waiting = worker.is_expectation_ready_to_start_working_on(&copy).await;
    assert!(!waiting.ready);
    assert_eq!(waiting.source_exists, Some(false));

    write_file(ingest.path(), "report.mov", &[7_u8; 4_096])?;
    let ready = worker.is_expectation_ready_to_start_working_on(&copy).await;
    assert!(ready.ready, "{:?}", ready.reason);
    assert!(!worker.is_expectation_fullfilled(&copy, false).await.fulfilled);

    let work = worker.work_on_expectation(&copy).await?;
    completed(tokio::time::timeout(Duration::from_secs(5), work.outcome()).await?)?;
    assert_eq!(std::fs::read(playout.path().join("report.mov"))?.len(), 4_096);

    let fulfilled = worker.is_expectation_fullfilled(&copy, false).await;
    assert!(fulfilled.fulfilled, "{:?}", fulfilled.reason);
    assert!(worker.registry().is_fulfilled("copy-report"));

    let removed = worker.remove_expectation(&copy).await;
    assert!(removed.removed, "{:?}", removed.reason);
    assert!(worker.registry().get("copy-report").is_none());
    assert!(!playout.path().join("report.mov").exists());
    assert!(!worker.is_expectation_fullfilled(&copy, true).await.fulfilled);
    assert!(!worker.registry().is_fulfilled("copy-report"));
    Ok(())
}

#[tokio::test]
async fn changed_source_is_no_longer_fulfilled() -> Result<()> {
    let ingest = temp_folder()?;
    let playout = temp_folder()?;
    let worker = worker(&EventBus::new());
    write_file(ingest.path(), "report.mov", b"first cut")?;
    let copy = media_file_copy(
        "copy-report",
        local_container("ingest", &folder_of(&ingest)),
        local_container("playout", &folder_of(&playout)),
        "report.mov",
        FileVersion::default(),
    );

    let work = worker.work_on_expectation(&copy).await?;
    completed(work.outcome().await)?;
    assert!(worker.is_expectation_fullfilled(&copy, false).await.fulfilled);

    write_file(ingest.path(), "report.mov", b"second, longer cut")?;
    let outcome = worker.is_expectation_fullfilled(&copy, true).await;
    assert!(!outcome.fulfilled);
    assert!(outcome.reason.tech.contains("file size"), "{}", outcome.reason.tech);
    Ok(())
}

#[tokio::test]
async fn removed_expectations_leave_the_registry() -> Result<()> {
    let ingest = temp_folder()?;
    let playout = temp_folder()?;
    let worker = worker(&EventBus::new());
    for index in 0..3 {
        let file = format!("clip-{index}.mov");
        write_file(ingest.path(), &file, b"payload")?;
        let copy = media_file_copy(
            &format!("copy-{index}"),
            local_container("ingest", &folder_of(&ingest)),
            local_container("playout", &folder_of(&playout)),
            &file,
            FileVersion::default(),
        );
        assert!(worker.is_expectation_ready_to_start_working_on(&copy).await.ready);
        completed(worker.work_on_expectation(&copy).await?.outcome().await)?;
        assert!(worker.is_expectation_fullfilled(&copy, false).await.fulfilled);
        assert!(worker.remove_expectation(&copy).await.removed);
    }
    assert!(worker.registry().is_empty(), "{} left behind", worker.registry().len());
    Ok(())
}

#[tokio::test]
async fn expected_version_is_recorded_and_enforced() -> Result<()> {
    const MODIFIED: u64 = 1_700_000_000_000;
    let ingest = temp_folder()?;
    let playout = temp_folder()?;
    let worker = worker(&EventBus::new());
    let source = write_file(ingest.path(), "report.mov", &[3_u8; 1_024])?;
    set_modified_millis(&source, MODIFIED)?;
    let copy = media_file_copy(
        "copy-versioned",
        local_container("ingest", &folder_of(&ingest)),
        local_container("playout", &folder_of(&playout)),
        "report.mov",
        FileVersion::sized(1_024, 1_700_000_000_000),
    );

    let ready = worker.is_expectation_ready_to_start_working_on(&copy).await;
    assert!(ready.ready, "{:?}", ready.reason);
    completed(worker.work_on_expectation(&copy).await?.outcome().await)?;

    let sidecar: serde_json::Value = serde_json::from_slice(&std::fs::read(
        playout.path().join("report.mov_metadata.json"),
    )?)?;
    assert_eq!(sidecar["fileSize"], 1_024);
    assert_eq!(sidecar["modifiedDate"], 1_700_000_000_000_i64);
    assert!(worker.is_expectation_fullfilled(&copy, false).await.fulfilled);

    set_modified_millis(&source, MODIFIED + 60_000)?;
    let outcome = worker.is_expectation_fullfilled(&copy, true).await;
    assert!(!outcome.fulfilled);
    assert!(outcome.reason.tech.contains("modified date"), "{}", outcome.reason.tech);
    let stale = worker.is_expectation_ready_to_start_working_on(&copy).await;
    assert!(!stale.ready);
    Ok(())
}

#[tokio::test]
async fn work_without_a_source_fails_at_setup() -> Result<()> {
    let ingest = temp_folder()?;
    let playout = temp_folder()?;
    let worker = worker(&EventBus::new());
    let copy = media_file_copy(
        "copy-missing",
        local_container("ingest", &folder_of(&ingest)),
        local_container("playout", &folder_of(&playout)),
        "missing.mov",
        FileVersion::default(),
    );

    let Err(err) = worker.work_on_expectation(&copy).await else {
        bail!("work should not start without a source");
    };
    assert!(matches!(err, PackageError::NotReady { .. }));
    assert!(err.reason().user.starts_with("Can't start working"));
    Ok(())
}

#[tokio::test]
async fn dependencies_gate_readiness_and_fulfilment_triggers() -> Result<()> {
    let ingest = temp_folder()?;
    let playout = temp_folder()?;
    let events = EventBus::new();
    let worker = worker(&events);
    write_file(ingest.path(), "report.mov", b"payload")?;
    write_file(ingest.path(), "report.srt", b"subtitles")?;

    let video = media_file_copy(
        "copy-video",
        local_container("ingest", &folder_of(&ingest)),
        local_container("playout", &folder_of(&playout)),
        "report.mov",
        FileVersion::default(),
    );
    let mut subtitles = media_file_copy(
        "copy-subtitles",
        local_container("ingest", &folder_of(&ingest)),
        local_container("playout", &folder_of(&playout)),
        "report.srt",
        FileVersion::default(),
    );
    subtitles.depends_on_fullfilled_ids = vec!["copy-video".to_string()];
    subtitles.trigger_by_fullfilled_ids = vec!["copy-video".to_string()];

    let gated = worker.is_expectation_ready_to_start_working_on(&subtitles).await;
    assert!(!gated.ready);
    assert_eq!(gated.reason.user, "Waiting for dependencies");

    let mut stream = events.subscribe(None);
    completed(worker.work_on_expectation(&video).await?.outcome().await)?;
    assert!(worker.is_expectation_fullfilled(&video, false).await.fulfilled);
    assert!(worker.is_expectation_ready_to_start_working_on(&subtitles).await.ready);

    let triggered = tokio::time::timeout(Duration::from_secs(1), async {
        while let Some(envelope) = stream.next().await {
            if let Event::ExpectationTriggered { triggered_ids, .. } = envelope.event {
                return Some(triggered_ids);
            }
        }
        None
    })
    .await?;
    assert_eq!(triggered, Some(vec!["copy-subtitles".to_string()]));
    Ok(())
}

#[tokio::test]
async fn cancelled_copy_reports_only_cancellation() -> Result<()> {
    let ingest = temp_folder()?;
    let playout = temp_folder()?;
    let metrics = Metrics::new()?;
    let worker = worker(&EventBus::new()).with_metrics(metrics.clone());
    write_file(ingest.path(), "report.mov", &[1_u8; 65_536])?;
    let copy = media_file_copy(
        "copy-report",
        local_container("ingest", &folder_of(&ingest)),
        local_container("playout", &folder_of(&playout)),
        "report.mov",
        FileVersion::default(),
    );

    let work = worker.work_on_expectation(&copy).await?;
    assert!(work.cancel());
    assert!(matches!(work.outcome().await, WorkOutcome::Cancelled));
    tokio::time::timeout(Duration::from_secs(2), async {
        while metrics.snapshot().work_cancelled_total == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    assert_eq!(metrics.snapshot().work_completed_total, 0);
    assert_eq!(metrics.snapshot().work_failed_total, 0);
    Ok(())
}

#[tokio::test]
async fn tape_clip_is_copied_between_archives() -> Result<()> {
    let gateway = MemoryTapeGateway::new();
    gateway.insert_clip(Some(1), "clip-1", 250);
    let events = EventBus::new();
    let worker = PackageWorker::new(
        "worker-a",
        AccessorContext::new(location("studio-lan"), events)
            .with_tape_connector(Arc::new(gateway.clone())),
    );
    let copy = tape_clip_copy(
        "copy-clip",
        tape_container("archive", "http://tape.local", 1),
        tape_container("vault", "http://tape.local", 2),
        "clip-1",
    );

    assert!(worker.is_expectation_ready_to_start_working_on(&copy).await.ready);
    assert!(!worker.is_expectation_fullfilled(&copy, false).await.fulfilled);

    completed(worker.work_on_expectation(&copy).await?.outcome().await)?;
    assert_eq!(gateway.copy_calls(), 1);
    assert_eq!(gateway.clip(Some(2), "clip-1").and_then(|clip| clip.frames), Some(250));
    let fulfilled = worker.is_expectation_fullfilled(&copy, false).await;
    assert!(fulfilled.fulfilled, "{:?}", fulfilled.reason);

    assert!(worker.remove_expectation(&copy).await.removed);
    assert!(gateway.clip(Some(2), "clip-1").is_none());
    assert!(gateway.clip(Some(1), "clip-1").is_some());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn scan_result_is_stored_and_invalidated_by_changes() -> Result<()> {
    use ferry_test_support::fixtures::{media_file_scan, write_script};

    let ingest = temp_folder()?;
    let tools = temp_folder()?;
    write_file(ingest.path(), "report.mov", b"payload")?;
    let probe = write_script(
        tools.path(),
        "ffprobe",
        r#"{ "streams": [{ "codec_type": "video" }], "format": {} }"#,
        0,
    )?;
    let store = Arc::new(MemoryPackageInfoStore::new());
    let worker = PackageWorker::new(
        "worker-a",
        AccessorContext::new(location("studio-lan"), EventBus::new()).with_package_info(store.clone()),
    )
    .with_probe(MediaProbe::new(probe.display().to_string(), Duration::from_secs(5)));
    let scan = media_file_scan(
        "scan-report",
        local_container("ingest", &folder_of(&ingest)),
        core_info_container("records"),
        "report.mov",
        FileVersion::default(),
    );

    let missing = worker.is_expectation_fullfilled(&scan, false).await;
    assert_eq!(missing.reason.user, "No Record found");

    completed(worker.work_on_expectation(&scan).await?.outcome().await)?;
    let key = PackageInfoKey::new("ingest", FileContent::new("report.mov"), FileVersion::default());
    let record = store.record(&key);
    assert_eq!(
        record.as_ref().map(|record| record.payload["streams"][0]["codec_type"].clone()),
        Some(serde_json::json!("video"))
    );
    assert!(worker.is_expectation_fullfilled(&scan, false).await.fulfilled);

    write_file(ingest.path(), "report.mov", b"re-edited payload")?;
    let stale = worker.is_expectation_fullfilled(&scan, true).await;
    assert_eq!(stale.reason.user, "Record doesn't match file");

    assert!(worker.remove_expectation(&scan).await.removed);
    assert!(store.is_empty());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn non_media_scan_fails_through_the_handle() -> Result<()> {
    use ferry_test_support::fixtures::{media_file_scan, write_script};

    let ingest = temp_folder()?;
    let tools = temp_folder()?;
    write_file(ingest.path(), "notes.txt", b"plain text")?;
    let probe = write_script(tools.path(), "ffprobe", r#"{ "streams": [] }"#, 0)?;
    let worker = PackageWorker::new(
        "worker-a",
        AccessorContext::new(location("studio-lan"), EventBus::new())
            .with_package_info(Arc::new(MemoryPackageInfoStore::new())),
    )
    .with_probe(MediaProbe::new(probe.display().to_string(), Duration::from_secs(5)));
    let scan = media_file_scan(
        "scan-notes",
        local_container("ingest", &folder_of(&ingest)),
        core_info_container("records"),
        "notes.txt",
        FileVersion::default(),
    );

    let outcome = worker.work_on_expectation(&scan).await?.outcome().await;
    let WorkOutcome::Failed { reason } = outcome else {
        bail!("scan of a text file should fail");
    };
    assert_eq!(reason.user, "File doesn't seem to be a media file");
    Ok(())
}
