//! Tests for restoring snapshots
//!
//! Restore overwrites files that still exist in the live tree and never
//! recreates files deleted since the snapshot was taken.

use std::fs;
use test_utils::{
    list_tree, CancellationToken, ComponentStatus, ErrorKind, FileAction, MockPlatform,
    NotifyEvent, PlatformCall, ResourceKind, RestoreStatus, SnapshotHarness, SnapshotManager,
    DATABASE, SITE,
};

fn backup_site(manager: &SnapshotManager) -> u64 {
    manager
        .create_snapshot(ResourceKind::VirtualHost, Some(SITE), &CancellationToken::new())
        .unwrap()
        .id
}

#[test]
fn test_restore_is_overwrite_only() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let site = harness.site();
    let id = backup_site(&manager);

    // Live tree shrinks to {index.html} and its content changes
    fs::write(site.join("index.html"), "<h1>Broken</h1>").unwrap();
    fs::remove_file(site.join("about.html")).unwrap();
    fs::remove_dir_all(site.join("css")).unwrap();

    let report = manager
        .restore_snapshot(ResourceKind::VirtualHost, Some(SITE), id, &CancellationToken::new())
        .unwrap();

    assert_eq!(list_tree(&site), vec!["index.html"]);
    assert_eq!(fs::read_to_string(site.join("index.html")).unwrap(), "<h1>Shop</h1>");

    assert_eq!(report.status, RestoreStatus::Complete);
    assert_eq!(report.restored, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.failed, 0);
    assert!(report.partial_error().is_none());
    assert!(report
        .files
        .iter()
        .any(|f| f.path.ends_with("about.html") && f.action == FileAction::Skipped));
}

#[test]
fn test_restore_leaves_new_files_alone() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let site = harness.site();
    let id = backup_site(&manager);

    fs::write(site.join("contact.html"), "<p>Call us</p>").unwrap();

    manager
        .restore_snapshot(ResourceKind::VirtualHost, Some(SITE), id, &CancellationToken::new())
        .unwrap();

    assert_eq!(
        fs::read_to_string(site.join("contact.html")).unwrap(),
        "<p>Call us</p>"
    );
}

#[test]
fn test_complete_restore_reloads_service_once() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let id = backup_site(&manager);

    let report = manager
        .restore_snapshot(ResourceKind::VirtualHost, Some(SITE), id, &CancellationToken::new())
        .unwrap();

    assert_eq!(harness.platform.reloads(), vec!["nginx"]);
    let reload = report.reload.unwrap();
    assert!(reload.success);
    assert_eq!(reload.service, "nginx");
}

#[test]
fn test_reload_failure_does_not_fail_restore() {
    let harness = SnapshotHarness::with_platform(MockPlatform::new().fail_reload("unit nginx.service not loaded"));
    let manager = harness.manager(5);
    let id = backup_site(&manager);

    let report = manager
        .restore_snapshot(ResourceKind::VirtualHost, Some(SITE), id, &CancellationToken::new())
        .unwrap();

    assert!(report.is_complete());
    let reload = report.reload.unwrap();
    assert!(!reload.success);
    assert!(reload.message.contains("not loaded"));
}

#[test]
fn test_database_restore_loads_dump() {
    let harness = SnapshotHarness::with_platform(MockPlatform::new().with_dump_contents("INSERT INTO orders VALUES (1);\n"));
    let manager = harness.manager(5);

    let snapshot = manager
        .create_snapshot(ResourceKind::Database, Some(DATABASE), &CancellationToken::new())
        .unwrap();
    let report = manager
        .restore_snapshot(ResourceKind::Database, Some(DATABASE), snapshot.id, &CancellationToken::new())
        .unwrap();

    assert!(report.is_complete());
    assert!(report.files.is_empty());
    assert!(report.reload.is_none());
    assert!(harness.platform.calls().contains(&PlatformCall::Load {
        target: DATABASE.to_string(),
        contents: "INSERT INTO orders VALUES (1);\n".to_string(),
    }));
}

#[test]
fn test_failed_load_is_restore_failed() {
    let harness = SnapshotHarness::with_platform(MockPlatform::new().fail_load("syntax error at line 1"));
    let manager = harness.manager(5);

    let snapshot = manager
        .create_snapshot(ResourceKind::Database, Some(DATABASE), &CancellationToken::new())
        .unwrap();
    let err = manager
        .restore_snapshot(ResourceKind::Database, Some(DATABASE), snapshot.id, &CancellationToken::new())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RestoreFailed);
    assert_eq!(harness.notifier.count(NotifyEvent::Failure), 1);
}

#[test]
fn test_missing_artifact_is_artifact_not_found() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let id = backup_site(&manager);
    fs::remove_file(manager.get_snapshot(id).unwrap().artifact_path).unwrap();

    let err = manager
        .restore_snapshot(ResourceKind::VirtualHost, Some(SITE), id, &CancellationToken::new())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ArtifactNotFound);
    assert!(harness.platform.reloads().is_empty());
}

#[test]
fn test_corrupt_artifact_leaves_tree_untouched() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let site = harness.site();
    let id = backup_site(&manager);

    fs::write(manager.get_snapshot(id).unwrap().artifact_path, "definitely not gzip").unwrap();
    fs::write(site.join("index.html"), "<h1>Current</h1>").unwrap();

    let err = manager
        .restore_snapshot(ResourceKind::VirtualHost, Some(SITE), id, &CancellationToken::new())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ArtifactCorrupt);
    assert_eq!(fs::read_to_string(site.join("index.html")).unwrap(), "<h1>Current</h1>");
}

#[test]
fn test_snapshot_of_other_resource_is_not_found() {
    let mut harness = SnapshotHarness::new();
    harness.add_tree(ResourceKind::VirtualHost, "blog.example.com", &[("index.html", "blog")]);
    let manager = harness.manager(5);
    let id = backup_site(&manager);

    let err = manager
        .restore_snapshot(ResourceKind::VirtualHost, Some("blog.example.com"), id, &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SnapshotNotFound);

    let err = manager
        .restore_snapshot(ResourceKind::DnsZone, Some(SITE), id, &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SnapshotNotFound);
}

#[test]
fn test_unknown_snapshot_id() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);

    let err = manager
        .restore_snapshot(ResourceKind::VirtualHost, Some(SITE), 99, &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SnapshotNotFound);
}

#[test]
fn test_failed_snapshot_cannot_be_restored() {
    let harness = SnapshotHarness::with_platform(MockPlatform::new().fail_dump("boom"));
    let manager = harness.manager(5);

    manager
        .create_snapshot(ResourceKind::Database, Some(DATABASE), &CancellationToken::new())
        .unwrap_err();
    let failed = manager.list_snapshots(ResourceKind::Database, Some(DATABASE)).unwrap()[0].id;

    let err = manager
        .restore_snapshot(ResourceKind::Database, Some(DATABASE), failed, &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArtifactNotFound);
}

#[test]
fn test_full_system_restore_is_partial_when_a_component_fails() {
    let mut harness = SnapshotHarness::with_platform(MockPlatform::new().fail_load("connection refused"));
    let (files_root, config_root) = harness.add_full_system(true);
    let manager = harness.manager(5);

    let snapshot = manager
        .create_snapshot(ResourceKind::FullSystem, None, &CancellationToken::new())
        .unwrap();

    fs::write(config_root.join("panel.toml"), "port = 1").unwrap();
    fs::write(files_root.join(SITE).join("index.html"), "changed").unwrap();

    let report = manager
        .restore_snapshot(ResourceKind::FullSystem, None, snapshot.id, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.status, RestoreStatus::Partial);
    assert_eq!(fs::read_to_string(config_root.join("panel.toml")).unwrap(), "port = 8443");
    assert_eq!(
        fs::read_to_string(files_root.join(SITE).join("index.html")).unwrap(),
        "<h1>Shop</h1>"
    );

    let database = report.components.iter().find(|c| c.name == "database").unwrap();
    assert_eq!(database.status, ComponentStatus::Failed);
    assert_eq!(database.kind, Some(ErrorKind::RestoreFailed));
    assert_eq!(harness.notifier.count(NotifyEvent::Warning), 1);
}

#[test]
fn test_file_missing_from_extraction_makes_restore_partial() {
    let harness = SnapshotHarness::with_platform(MockPlatform::new().skip_on_extract("about.html"));
    let manager = harness.manager(5);
    let site = harness.site();
    let id = backup_site(&manager);

    fs::write(site.join("index.html"), "<h1>Broken</h1>").unwrap();
    fs::write(site.join("about.html"), "<p>Changed</p>").unwrap();

    let report = manager
        .restore_snapshot(ResourceKind::VirtualHost, Some(SITE), id, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.status, RestoreStatus::Partial);
    assert_eq!(report.failed, 1);
    assert_eq!(
        report.partial_error().map(|e| e.kind()),
        Some(ErrorKind::PartialMerge)
    );
    assert!(report
        .files
        .iter()
        .any(|f| f.path.ends_with("about.html") && matches!(f.action, FileAction::Failed(_))));

    // The rest of the tree is still restored
    assert_eq!(fs::read_to_string(site.join("index.html")).unwrap(), "<h1>Shop</h1>");
    assert_eq!(fs::read_to_string(site.join("about.html")).unwrap(), "<p>Changed</p>");

    assert!(report.reload.is_none());
    assert!(harness.platform.reloads().is_empty());
    assert_eq!(harness.notifier.count(NotifyEvent::Warning), 1);
}
