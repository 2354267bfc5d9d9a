//! Tests for listing, statistics, deletion, sizing and verification

use panel_snapshots::error::OperationResult;
use std::fs;
use test_utils::{
    sample_snapshot, CancellationToken, ErrorKind, NewSnapshot, ResourceKind, Snapshot,
    SnapshotCatalog, SnapshotHarness, SnapshotManager, DATABASE, MB, SITE,
};

fn backup_site(manager: &SnapshotManager) -> Snapshot {
    manager
        .create_snapshot(ResourceKind::VirtualHost, Some(SITE), &CancellationToken::new())
        .unwrap()
}

/// Record a completed fixture snapshot directly in the catalog
fn record(catalog: &dyn SnapshotCatalog, fixture: Snapshot) -> Snapshot {
    let inserted = catalog
        .insert(NewSnapshot {
            resource_kind: fixture.resource_kind,
            resource_ref: fixture.resource_ref.clone(),
            artifact_path: fixture.artifact_path.clone(),
            created_at: fixture.created_at,
        })
        .unwrap();
    let snapshot = Snapshot {
        id: inserted.id,
        ..fixture
    };
    catalog.update(&snapshot).unwrap();
    snapshot
}

#[test]
fn test_delete_removes_artifact_and_record() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let snapshot = backup_site(&manager);

    manager.delete_snapshot(snapshot.id).unwrap();

    assert!(!snapshot.artifact_path.exists());
    assert_eq!(
        manager.get_snapshot(snapshot.id).unwrap_err().kind(),
        ErrorKind::SnapshotNotFound
    );
}

#[test]
fn test_delete_with_artifact_already_gone() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let snapshot = backup_site(&manager);
    fs::remove_file(&snapshot.artifact_path).unwrap();

    manager.delete_snapshot(snapshot.id).unwrap();

    assert!(manager
        .list_snapshots(ResourceKind::VirtualHost, Some(SITE))
        .unwrap()
        .is_empty());
}

#[test]
fn test_delete_unknown_snapshot() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);

    let result = OperationResult::from_result(manager.delete_snapshot(7), "deleted");
    assert!(!result.success);
    assert_eq!(result.kind, Some(ErrorKind::SnapshotNotFound));
    assert_eq!(result.message, "Snapshot 7 not found");
}

#[test]
fn test_list_is_newest_first_and_scoped() {
    let mut harness = SnapshotHarness::new();
    harness.add_tree(ResourceKind::VirtualHost, "blog.example.com", &[("index.html", "blog")]);
    let manager = harness.manager(5);

    let first = backup_site(&manager);
    manager
        .create_snapshot(ResourceKind::VirtualHost, Some("blog.example.com"), &CancellationToken::new())
        .unwrap();
    let second = backup_site(&manager);

    let listed: Vec<u64> = manager
        .list_snapshots(ResourceKind::VirtualHost, Some(SITE))
        .unwrap()
        .iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(listed, vec![second.id, first.id]);
}

#[test]
fn test_list_rejects_missing_ref() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);

    let err = manager.list_snapshots(ResourceKind::VirtualHost, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
}

#[test]
fn test_stats_three_database_snapshots() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);

    let mut last = None;
    for (i, size) in [10, 12, 11].into_iter().enumerate() {
        let stored = record(
            harness.catalog.as_ref(),
            sample_snapshot(0, ResourceKind::Database, DATABASE, size * MB, i as i64 * 60),
        );
        last = stored.completed_at;
    }

    let stats = manager.stats().unwrap();
    let database = &stats[&ResourceKind::Database];
    assert_eq!(database.count, 3);
    assert_eq!(database.total_bytes, 33 * 1024 * 1024);
    assert_eq!(database.last_snapshot, last);
}

#[test]
fn test_stats_match_created_artifacts() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let a = backup_site(&manager);
    let b = backup_site(&manager);

    let stats = manager.stats().unwrap();
    let hosts = &stats[&ResourceKind::VirtualHost];
    assert_eq!(hosts.count, 2);
    assert_eq!(hosts.total_bytes, a.size_bytes + b.size_bytes);
    assert_eq!(hosts.last_snapshot, b.completed_at);
}

#[test]
fn test_resource_size_of_live_tree() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);

    let size = manager
        .resource_size(ResourceKind::VirtualHost, Some(SITE), &CancellationToken::new())
        .unwrap();
    assert_eq!(size.files, 3);
    assert_eq!(size.bytes, 47);
}

#[test]
fn test_resource_size_of_database_is_not_found() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);

    let err = manager
        .resource_size(ResourceKind::Database, Some(DATABASE), &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
}

#[test]
fn test_verify_fresh_snapshot() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let snapshot = backup_site(&manager);

    let report = manager.verify_snapshot(snapshot.id, false).unwrap();
    assert!(report.is_ok(), "{:?}", report.problem);
    let contents = report.contents.unwrap();
    assert_eq!(contents.files, 3);
    assert_eq!(contents.bytes, 47);
}

#[test]
fn test_verify_detects_size_drift_and_updates() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let mut snapshot = backup_site(&manager);
    snapshot.size_bytes += 100;
    manager.catalog().update(&snapshot).unwrap();

    let report = manager.verify_snapshot(snapshot.id, false).unwrap();
    assert!(!report.is_ok());
    assert!(report.problem.unwrap().contains("differs"));

    let report = manager.verify_snapshot(snapshot.id, true).unwrap();
    assert!(report.size_updated);
    assert!(report.is_ok());
    assert_eq!(
        manager.get_snapshot(snapshot.id).unwrap().size_bytes,
        fs::metadata(&snapshot.artifact_path).unwrap().len()
    );
}

#[test]
fn test_verify_missing_artifact() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let snapshot = backup_site(&manager);
    fs::remove_file(&snapshot.artifact_path).unwrap();

    let report = manager.verify_snapshot(snapshot.id, true).unwrap();
    assert!(!report.artifact_exists);
    assert!(!report.size_updated);
    assert!(report.problem.is_some());
}
