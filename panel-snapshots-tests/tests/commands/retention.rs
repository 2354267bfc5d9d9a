//! Tests for count-based retention
//!
//! Retention runs after every backup and can be triggered per resource or
//! as a sweep over the whole catalog.

use panel_snapshots::utils::locker::ResourceLock;
use std::fs;
use test_utils::{
    CancellationToken, ErrorKind, NotifyEvent, ResourceKind, RetentionPolicy, SnapshotCatalog,
    SnapshotHarness, SnapshotManager, DATABASE, SITE,
};

fn backup(manager: &SnapshotManager, kind: ResourceKind, resource_ref: &str) -> u64 {
    manager
        .create_snapshot(kind, Some(resource_ref), &CancellationToken::new())
        .unwrap()
        .id
}

fn ids(manager: &SnapshotManager, kind: ResourceKind, resource_ref: &str) -> Vec<u64> {
    manager
        .list_snapshots(kind, Some(resource_ref))
        .unwrap()
        .iter()
        .map(|s| s.id)
        .collect()
}

#[test]
fn test_sixth_backup_prunes_oldest() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);

    let created: Vec<u64> = (0..6)
        .map(|_| backup(&manager, ResourceKind::VirtualHost, SITE))
        .collect();

    let remaining = manager.list_snapshots(ResourceKind::VirtualHost, Some(SITE)).unwrap();
    assert_eq!(remaining.len(), 5);

    let mut kept: Vec<u64> = remaining.iter().map(|s| s.id).collect();
    kept.sort_unstable();
    assert_eq!(kept, created[1..].to_vec());

    // The oldest artifact is gone from disk, the others are still there
    let dir = harness.backup_root().join("virtualHost").join(SITE);
    let on_disk = fs::read_dir(&dir).unwrap().count();
    assert_eq!(on_disk, 5);
    assert!(remaining.iter().all(|s| s.artifact_path.is_file()));
}

#[test]
fn test_count_never_exceeds_limit() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(3);

    for _ in 0..7 {
        backup(&manager, ResourceKind::VirtualHost, SITE);
        assert!(manager.list_snapshots(ResourceKind::VirtualHost, Some(SITE)).unwrap().len() <= 3);
    }
}

#[test]
fn test_prune_is_idempotent() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(10);
    for _ in 0..4 {
        backup(&manager, ResourceKind::VirtualHost, SITE);
    }

    let first = manager.prune(ResourceKind::VirtualHost, Some(SITE), 2).unwrap();
    let after_first = ids(&manager, ResourceKind::VirtualHost, SITE);

    let second = manager.prune(ResourceKind::VirtualHost, Some(SITE), 2).unwrap();
    let after_second = ids(&manager, ResourceKind::VirtualHost, SITE);

    assert_eq!(first.deleted.len(), 2);
    assert!(second.deleted.is_empty());
    assert_eq!(after_first, after_second);
    assert_eq!(after_second, vec![4, 3]);
}

#[test]
fn test_prune_with_fewer_snapshots_keeps_all() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(10);
    backup(&manager, ResourceKind::VirtualHost, SITE);
    backup(&manager, ResourceKind::VirtualHost, SITE);

    let report = manager.prune(ResourceKind::VirtualHost, Some(SITE), 5).unwrap();
    assert_eq!(report.kept, 2);
    assert!(report.deleted.is_empty());
    assert_eq!(ids(&manager, ResourceKind::VirtualHost, SITE).len(), 2);
}

#[test]
fn test_prune_is_scoped_to_one_resource() {
    let mut harness = SnapshotHarness::new();
    harness.add_tree(ResourceKind::VirtualHost, "blog.example.com", &[("index.html", "blog")]);
    let manager = harness.manager(10);
    for _ in 0..3 {
        backup(&manager, ResourceKind::VirtualHost, SITE);
        backup(&manager, ResourceKind::VirtualHost, "blog.example.com");
    }

    manager.prune(ResourceKind::VirtualHost, Some(SITE), 1).unwrap();

    assert_eq!(ids(&manager, ResourceKind::VirtualHost, SITE).len(), 1);
    assert_eq!(ids(&manager, ResourceKind::VirtualHost, "blog.example.com").len(), 3);
}

#[test]
fn test_unremovable_artifact_keeps_record() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(10);
    let oldest = backup(&manager, ResourceKind::VirtualHost, SITE);
    backup(&manager, ResourceKind::VirtualHost, SITE);

    // A non-empty directory where the artifact was cannot be removed as a file
    let artifact = manager.get_snapshot(oldest).unwrap().artifact_path;
    fs::remove_file(&artifact).unwrap();
    fs::create_dir_all(artifact.join("blocker")).unwrap();

    let report = manager.prune(ResourceKind::VirtualHost, Some(SITE), 1).unwrap();

    assert!(report.deleted.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].snapshot_id, oldest);
    assert!(manager.get_snapshot(oldest).is_ok());
    assert_eq!(harness.notifier.count(NotifyEvent::Warning), 1);
}

#[test]
fn test_cleanup_failure_does_not_fail_backup() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(1);
    let oldest = backup(&manager, ResourceKind::VirtualHost, SITE);

    let artifact = harness
        .backup_root()
        .join("virtualHost")
        .join(SITE)
        .join("blocked");
    // Point the oldest record at an unremovable path
    let mut record = manager.get_snapshot(oldest).unwrap();
    fs::create_dir_all(artifact.join("inner")).unwrap();
    record.artifact_path = artifact;
    manager.catalog().update(&record).unwrap();

    let result = manager.create_snapshot(ResourceKind::VirtualHost, Some(SITE), &CancellationToken::new());
    assert!(result.is_ok());

    assert_eq!(ids(&manager, ResourceKind::VirtualHost, SITE).len(), 2);
    assert_eq!(harness.notifier.count(NotifyEvent::Warning), 1);
}

#[test]
fn test_missing_artifact_still_pruned() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(10);
    let oldest = backup(&manager, ResourceKind::VirtualHost, SITE);
    backup(&manager, ResourceKind::VirtualHost, SITE);
    fs::remove_file(manager.get_snapshot(oldest).unwrap().artifact_path).unwrap();

    let report = manager.prune(ResourceKind::VirtualHost, Some(SITE), 1).unwrap();
    assert_eq!(report.deleted, vec![oldest]);
    assert!(report.failures.is_empty());
}

#[test]
fn test_prune_all_applies_per_kind_limits() {
    let mut harness = SnapshotHarness::new();
    harness.add_tree(ResourceKind::DnsZone, "example.com", &[("db.example.com", "@ IN SOA ns1")]);

    // Build everything with a generous limit, then sweep with the real one
    let loose = harness.manager(10);
    for _ in 0..4 {
        backup(&loose, ResourceKind::VirtualHost, SITE);
        backup(&loose, ResourceKind::DnsZone, "example.com");
        backup(&loose, ResourceKind::Database, DATABASE);
    }

    let mut retention = RetentionPolicy::uniform(2);
    retention.overrides.insert(ResourceKind::Database, 3);
    let manager = harness.manager_with(harness.settings(2).with_retention(retention));

    let reports = manager.prune_all().unwrap();
    assert_eq!(reports.len(), 3);

    assert_eq!(ids(&manager, ResourceKind::VirtualHost, SITE).len(), 2);
    assert_eq!(ids(&manager, ResourceKind::DnsZone, "example.com").len(), 2);
    assert_eq!(ids(&manager, ResourceKind::Database, DATABASE).len(), 3);
}

#[test]
fn test_prune_all_skips_busy_resource() {
    let mut harness = SnapshotHarness::new();
    harness.add_tree(ResourceKind::DnsZone, "example.com", &[("db.example.com", "@ IN SOA ns1")]);
    let loose = harness.manager(10);
    for _ in 0..3 {
        backup(&loose, ResourceKind::VirtualHost, SITE);
        backup(&loose, ResourceKind::DnsZone, "example.com");
    }

    let manager = harness.manager(1);
    let _held = ResourceLock::acquire(
        &manager.settings().lock_directory,
        ResourceKind::VirtualHost,
        Some(SITE),
    )
    .unwrap();

    let reports = manager.prune_all().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].resource_kind, ResourceKind::DnsZone);
    assert_eq!(ids(&manager, ResourceKind::VirtualHost, SITE).len(), 3);
    assert_eq!(ids(&manager, ResourceKind::DnsZone, "example.com").len(), 1);
}

#[test]
fn test_busy_resource_rejects_backup() {
    let harness = SnapshotHarness::new();
    let manager = harness.manager(5);
    let _held = ResourceLock::acquire(
        &manager.settings().lock_directory,
        ResourceKind::VirtualHost,
        Some(SITE),
    )
    .unwrap();

    let err = manager
        .create_snapshot(ResourceKind::VirtualHost, Some(SITE), &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceBusy);

    let err = manager.prune(ResourceKind::VirtualHost, Some(SITE), 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceBusy);
}
