//! Tests for snapshot creation
//!
//! A backup writes one artifact per snapshot and records its size.

use rstest::rstest;
use std::fs;
use test_utils::{
    CancellationToken, ComponentStatus, ErrorKind, MockPlatform, NotifyEvent, PlatformCall,
    ResourceKind, SnapshotCatalog, SnapshotHarness, SnapshotStatus, DATABASE, SITE,
};

#[rstest]
#[case::mail_account(ResourceKind::MailAccount, "info@shop.example.com")]
#[case::dns_zone(ResourceKind::DnsZone, "shop.example.com")]
#[case::ftp_account(ResourceKind::FtpAccount, "deploy")]
#[case::ssh_account(ResourceKind::SshAccount, "deploy")]
#[case::certificate(ResourceKind::TlsCertificate, "shop.example.com")]
#[case::cron_job(ResourceKind::CronJob, "deploy")]
#[case::log_set(ResourceKind::LogSet, "shop.example.com")]
#[case::notification_set(ResourceKind::NotificationSet, "admin")]
#[case::settings_set(ResourceKind::SettingsSet, "panel")]
fn test_created_artifact_matches_record(#[case] kind: ResourceKind, #[case] resource_ref: &str) {
    let mut harness = SnapshotHarness::new();
    harness.add_tree(kind, resource_ref, &[("data.txt", "payload"), ("nested/more.txt", "more")]);
    let manager = harness.manager(5);

    manager
        .create_snapshot(kind, Some(resource_ref), &CancellationToken::new())
        .unwrap();

    let listed = manager.list_snapshots(kind, Some(resource_ref)).unwrap();
    assert_eq!(listed.len(), 1);
    let snapshot = &listed[0];
    assert_eq!(snapshot.status, SnapshotStatus::Completed);
    assert_eq!(
        snapshot.size_bytes,
        fs::metadata(&snapshot.artifact_path).unwrap().len()
    );
    assert!(snapshot.artifact_path.starts_with(harness.backup_root().join(kind.as_str())));
}

#[test]
fn test_virtual_host_artifact_layout() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);

    let snapshot = manager
        .create_snapshot(ResourceKind::VirtualHost, Some(SITE), &CancellationToken::new())
        .unwrap();

    let dir = harness.backup_root().join("virtualHost").join(SITE);
    assert_eq!(snapshot.artifact_path.parent().unwrap(), dir);

    let name = snapshot.artifact_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with(&format!("virtualHost_{}_", SITE)), "{}", name);
    assert!(name.ends_with(".tar.gz"), "{}", name);
    assert!(snapshot.completed_at.is_some());

    // No .partial file is left behind
    let leftovers: Vec<_> = fs::read_dir(&dir)
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_database_backup_writes_dump() {
    let harness = SnapshotHarness::with_platform(MockPlatform::new().with_dump_contents("CREATE TABLE orders (id int);\n"));
    let manager = harness.manager(5);

    let snapshot = manager
        .create_snapshot(ResourceKind::Database, Some(DATABASE), &CancellationToken::new())
        .unwrap();

    assert!(snapshot.artifact_path.to_string_lossy().ends_with(".sql"));
    assert_eq!(
        fs::read_to_string(&snapshot.artifact_path).unwrap(),
        "CREATE TABLE orders (id int);\n"
    );
    assert_eq!(
        harness.platform.calls(),
        vec![PlatformCall::Dump {
            target: DATABASE.to_string()
        }]
    );
}

#[test]
fn test_failed_dump_is_recorded_and_notified() {
    let harness = SnapshotHarness::with_platform(MockPlatform::new().fail_dump("access denied for user"));
    let manager = harness.manager(5);

    let err = manager
        .create_snapshot(ResourceKind::Database, Some(DATABASE), &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DumpFailed);

    let listed = manager.list_snapshots(ResourceKind::Database, Some(DATABASE)).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, SnapshotStatus::Failed);
    assert!(listed[0].error.as_deref().unwrap().contains("access denied"));
    assert!(!listed[0].artifact_path.exists());

    assert_eq!(harness.notifier.count(NotifyEvent::Failure), 1);
    assert_eq!(harness.notifier.count(NotifyEvent::Success), 0);
}

#[test]
fn test_unknown_resource_is_not_found() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);

    let err = manager
        .create_snapshot(ResourceKind::VirtualHost, Some("missing.example.com"), &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
}

#[test]
fn test_path_traversal_ref_rejected() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);

    let err = manager
        .create_snapshot(ResourceKind::VirtualHost, Some("../etc"), &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
    assert!(manager.catalog().list_all().unwrap().is_empty());
}

#[test]
fn test_cancelled_backup_is_failed() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = manager
        .create_snapshot(ResourceKind::VirtualHost, Some(SITE), &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let listed = manager.list_snapshots(ResourceKind::VirtualHost, Some(SITE)).unwrap();
    assert_eq!(listed[0].status, SnapshotStatus::Failed);
    assert!(!listed[0].artifact_path.exists());
}

#[test]
fn test_full_system_records_components() {
    let mut harness = SnapshotHarness::new();
    harness.add_full_system(true);
    let manager = harness.manager(5);

    let snapshot = manager
        .create_snapshot(ResourceKind::FullSystem, None, &CancellationToken::new())
        .unwrap();

    assert!(snapshot.artifact_path.to_string_lossy().ends_with(".tar"));
    assert_eq!(snapshot.artifact_path.parent().unwrap(), harness.backup_root().join("fullSystem"));

    let names: Vec<&str> = snapshot.components.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["files", "database", "config"]);
    assert!(snapshot.components.iter().all(|c| c.status == ComponentStatus::Succeeded));

    // Every database on the server, not one in particular
    assert!(harness.platform.calls().contains(&PlatformCall::Dump {
        target: "<all databases>".to_string()
    }));
}

#[test]
fn test_full_system_survives_failed_component() {
    let mut harness = SnapshotHarness::with_platform(MockPlatform::new().fail_dump("server gone away"));
    harness.add_full_system(true);
    let manager = harness.manager(5);

    let snapshot = manager
        .create_snapshot(ResourceKind::FullSystem, None, &CancellationToken::new())
        .unwrap();

    assert_eq!(snapshot.status, SnapshotStatus::Completed);
    let database = snapshot.components.iter().find(|c| c.name == "database").unwrap();
    assert_eq!(database.status, ComponentStatus::Failed);
    assert_eq!(database.kind, Some(ErrorKind::DumpFailed));
    assert!(snapshot
        .components
        .iter()
        .filter(|c| c.name != "database")
        .all(|c| c.status == ComponentStatus::Succeeded));
}

#[test]
fn test_full_system_without_database_skips_component() {
    let mut harness = SnapshotHarness::new();
    harness.add_full_system(false);
    let manager = harness.manager(5);

    let snapshot = manager
        .create_snapshot(ResourceKind::FullSystem, None, &CancellationToken::new())
        .unwrap();

    let database = snapshot.components.iter().find(|c| c.name == "database").unwrap();
    assert_eq!(database.status, ComponentStatus::Skipped);
    assert!(harness.platform.calls().is_empty());
}

#[test]
fn test_success_is_notified() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);

    manager
        .create_snapshot(ResourceKind::VirtualHost, Some(SITE), &CancellationToken::new())
        .unwrap();

    assert_eq!(harness.notifier.count(NotifyEvent::Success), 1);
    assert_eq!(harness.notifier.events().len(), 1);
}
