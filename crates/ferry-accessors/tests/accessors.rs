use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ferry_accessors::{
    AccessorContext, AccessorHandle, HandleContent, PackageAccessor, pending_removals,
};
use ferry_config::LocationConfig;
use ferry_core::{
    AccessorOnPackage, CleanupCronjob, ClipContent, FileContent, FileVersion, PackageInfoKey,
    WorkOptions,
};
use ferry_drives::{DriveLetterManager, DriveSettings, MemoryWorkerStorage};
use ferry_events::EventBus;
use ferry_test_support::fixtures::{
    COMPUTER_ID, container_expectation, folder_of, local_container, location, temp_folder,
    write_aged_file, write_file,
};
use ferry_test_support::mocks::{MemoryPackageInfoStore, MemoryTapeGateway, RecordingDrive};
use serde_json::json;

fn ctx() -> AccessorContext {
    AccessorContext::new(location("studio-lan"), EventBus::new())
}

fn file(path: &str) -> HandleContent {
    HandleContent::File(FileContent::new(path))
}

fn local(folder: &str) -> AccessorOnPackage {
    AccessorOnPackage::local_folder(COMPUTER_ID, folder)
        .readable()
        .writable()
}

#[tokio::test]
async fn temporary_write_becomes_visible_on_finalize() -> anyhow::Result<()> {
    let source_dir = temp_folder()?;
    let target_dir = temp_folder()?;
    write_file(source_dir.path(), "news/report.mov", &[7_u8; 4_096])?;
    let ctx = ctx();

    let source = AccessorHandle::new(
        &ctx,
        "local",
        &local(&folder_of(&source_dir)),
        file("news/report.mov"),
        WorkOptions::default(),
    )?;
    let target = AccessorHandle::new(
        &ctx,
        "local",
        &local(&folder_of(&target_dir)),
        file("news/report.mov"),
        WorkOptions {
            use_temporary_file_path: true,
            ..WorkOptions::default()
        },
    )?;
    assert!(target.check_package_container_write_access().await.is_ok());

    let stream = source.get_package_read_stream().await?;
    assert_eq!(stream.size, Some(4_096));
    let written = target.put_package_stream(stream.reader).await?.finished().await?;
    assert_eq!(written, 4_096);
    let final_path = target_dir.path().join("news/report.mov");
    assert!(!final_path.exists());
    assert!(target_dir.path().join("news/report.mov.pmtemp").exists());

    target.finalize_package().await?;
    assert!(final_path.exists());
    assert!(!target_dir.path().join("news/report.mov.pmtemp").exists());

    let source_version = source.get_package_actual_version().await?;
    target
        .update_metadata(&serde_json::to_value(source_version.as_file())?)
        .await?;
    let stored: Option<FileVersion> = target
        .fetch_metadata()
        .await?
        .map(serde_json::from_value)
        .transpose()?;
    assert_eq!(stored.as_ref(), source_version.as_file());
    Ok(())
}

#[tokio::test]
async fn delayed_removal_is_cancelled_when_the_package_is_back_in_place() -> anyhow::Result<()> {
    let dir = temp_folder()?;
    write_file(dir.path(), "report.mov", b"payload")?;
    let handle = AccessorHandle::new(
        &ctx(),
        "local",
        &local(&folder_of(&dir)),
        file("report.mov"),
        WorkOptions {
            remove_delay: Some(60_000),
            ..WorkOptions::default()
        },
    )?;

    handle.remove_package().await?;
    assert!(dir.path().join("report.mov").exists());
    let pending = pending_removals(dir.path()).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].file_path, "report.mov");

    handle.package_is_in_place().await?;
    assert!(pending_removals(dir.path()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn cleanup_cron_purges_old_files_with_their_sidecars() -> anyhow::Result<()> {
    let dir = temp_folder()?;
    let hour = Duration::from_secs(3_600);
    write_aged_file(dir.path(), "old/report.mov", b"old", hour)?;
    write_aged_file(dir.path(), "old/report.mov_metadata.json", b"{}", hour)?;
    write_file(dir.path(), "fresh.mov", b"new")?;

    let mut container = container_expectation(&local_container("playout", &folder_of(&dir)));
    container.cronjobs.cleanup = Some(CleanupCronjob {
        clean_file_age: Some(60),
    });
    let accessor = &container.accessors["local"];
    let handle = AccessorHandle::new(
        &ctx(),
        "local",
        accessor,
        HandleContent::ContainerOnly,
        WorkOptions::default(),
    )?;
    handle
        .run_cron_job(&container)
        .await
        .map_err(anyhow::Error::new)?;

    assert!(!dir.path().join("old/report.mov").exists());
    assert!(!dir.path().join("old/report.mov_metadata.json").exists());
    assert!(dir.path().join("fresh.mov").exists());
    Ok(())
}

fn share_ctx(drive: &Arc<RecordingDrive>) -> AccessorContext {
    let settings = DriveSettings {
        computer_id: COMPUTER_ID.into(),
        letters: vec!['X'],
        mapping_enabled: true,
        credential_sessions: false,
        outer_timeout: Duration::from_millis(1_000),
        inner_timeout: Duration::from_millis(800),
    };
    let drives = DriveLetterManager::new(Arc::new(MemoryWorkerStorage::new()), drive.clone(), settings);
    AccessorContext::new(LocationConfig::default(), EventBus::new()).with_drives(drives)
}

#[tokio::test]
async fn file_share_is_addressed_through_its_drive_letter() -> anyhow::Result<()> {
    let drive = Arc::new(RecordingDrive::new());
    let ctx = share_ctx(&drive);

    let share = AccessorOnPackage::file_share(r"\\nas\media", None).readable();
    let handle = AccessorHandle::new(&ctx, "share", &share, file("report.mov"), WorkOptions::default())?;
    let path = handle.local_package_path().await?;
    assert_eq!(path, Path::new(r"X:\").join("report.mov"));
    handle.local_package_path().await?;
    assert_eq!(drive.mount_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn file_share_without_drive_mapping_uses_its_unc_path() -> anyhow::Result<()> {
    let drive = Arc::new(RecordingDrive::new());
    let ctx = share_ctx(&drive);

    let share = AccessorOnPackage::file_share(r"\\nas\media", None)
        .readable()
        .without_drive_mapping();
    let handle = AccessorHandle::new(&ctx, "share", &share, file("report.mov"), WorkOptions::default())?;
    let path = handle.local_package_path().await?;
    assert_eq!(path, Path::new(r"\\nas\media").join("report.mov"));
    assert_eq!(drive.mount_calls(), 0);
    assert_eq!(drive.list_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn tape_clips_are_copied_by_the_gateway() -> anyhow::Result<()> {
    let gateway = MemoryTapeGateway::new();
    gateway.insert_clip(Some(1), "news-0412", 1_500);
    let ctx = ctx().with_tape_connector(Arc::new(gateway.clone()));
    let clip = HandleContent::Clip(ClipContent {
        guid: Some("news-0412".into()),
        title: None,
    });
    let mut source = AccessorOnPackage::tape("http://archive-a").readable();
    source.server_id = Some(1);
    let mut target = AccessorOnPackage::tape("http://archive-b").writable();
    target.server_id = Some(2);

    let source = AccessorHandle::new(&ctx, "tape", &source, clip.clone(), WorkOptions::default())?;
    let target = AccessorHandle::new(&ctx, "tape", &target, clip, WorkOptions::default())?;
    assert!(target.check_package_read_access().await.is_err());

    let info = source.get_package_read_info().await?;
    let frames = target.put_package_info(info).await?.finished().await?;
    assert_eq!(frames, 1_500);
    assert!(target.check_package_read_access().await.is_ok());
    assert_eq!(gateway.copy_calls(), 1);

    target.remove_package().await?;
    assert!(gateway.clip(Some(2), "news-0412").is_none());
    Ok(())
}

#[tokio::test]
async fn scan_records_go_to_the_record_store() -> anyhow::Result<()> {
    let store = Arc::new(MemoryPackageInfoStore::new());
    let ctx = ctx().with_package_info(store.clone());
    let handle = AccessorHandle::new(
        &ctx,
        "core",
        &AccessorOnPackage::core_package_info().readable().writable(),
        file("report.mov"),
        WorkOptions::default(),
    )?;
    let Some(records) = handle.as_core_package_info() else {
        anyhow::bail!("expected a record-store handle");
    };
    let key = PackageInfoKey::new("ingest", FileContent::new("report.mov"), FileVersion::sized(3, 9));
    records.store_package_info(&key, "hash", json!({ "streams": [] })).await?;
    assert_eq!(store.record(&key).map(|record| record.hash).as_deref(), Some("hash"));
    records.remove_package_info(&key).await?;
    assert!(store.is_empty());
    Ok(())
}
