//! Unit tests for the snapshot catalog
//!
//! Persistence, listing order and per-kind statistics.

use rstest::rstest;
use test_utils::{
    base_time, sample_snapshot, JsonCatalog, MemoryCatalog, NewSnapshot, ResourceKind, Snapshot,
    SnapshotCatalog, SnapshotStatus, TestContext, DATABASE, MB, SITE,
};

/// Insert a record and overwrite it with the fixture's fields, keeping the assigned id
fn store(catalog: &dyn SnapshotCatalog, fixture: Snapshot) -> Snapshot {
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
fn test_insert_assigns_increasing_ids() {
    let catalog = MemoryCatalog::new();
    let first = store(&catalog, sample_snapshot(0, ResourceKind::VirtualHost, SITE, MB, 0));
    let second = store(&catalog, sample_snapshot(0, ResourceKind::VirtualHost, SITE, MB, 60));

    assert_eq!(first.id, 1);
    assert_eq!(second.id, 2);
}

#[test]
fn test_insert_starts_pending() {
    let catalog = MemoryCatalog::new();
    let snapshot = catalog
        .insert(NewSnapshot {
            resource_kind: ResourceKind::Database,
            resource_ref: Some(DATABASE.to_string()),
            artifact_path: "/backups/database/shop_db/a.sql".into(),
            created_at: base_time(),
        })
        .unwrap();

    assert_eq!(snapshot.status, SnapshotStatus::Pending);
    assert_eq!(snapshot.size_bytes, 0);
    assert!(snapshot.completed_at.is_none());
}

#[test]
fn test_json_catalog_survives_reopen() {
    let ctx = TestContext::new();
    let path = ctx.temp_dir().join("catalog").join("catalog.json");

    {
        let catalog = JsonCatalog::open(&path).unwrap();
        store(&catalog, sample_snapshot(0, ResourceKind::VirtualHost, SITE, 3 * MB, 0));
        store(&catalog, sample_snapshot(0, ResourceKind::Database, DATABASE, MB, 30));
        assert!(catalog.delete(1).unwrap());
    }

    let reopened = JsonCatalog::open(&path).unwrap();
    let all = reopened.list_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, 2);
    assert_eq!(all[0].resource_kind, ResourceKind::Database);

    // Ids are never reused, even after a delete and reopen
    let next = store(&reopened, sample_snapshot(0, ResourceKind::Database, DATABASE, MB, 90));
    assert_eq!(next.id, 3);
}

#[test]
fn test_json_catalog_rejects_garbage() {
    let ctx = TestContext::new();
    let path = ctx.create_file("catalog.json", "{ not json");

    assert!(JsonCatalog::open(&path).is_err());
}

#[test]
fn test_update_of_missing_record_fails() {
    let catalog = MemoryCatalog::new();
    let orphan = sample_snapshot(42, ResourceKind::VirtualHost, SITE, MB, 0);

    assert!(catalog.update(&orphan).is_err());
    assert!(!catalog.delete(42).unwrap());
}

#[test]
fn test_list_by_resource_newest_first() {
    let catalog = MemoryCatalog::new();
    store(&catalog, sample_snapshot(0, ResourceKind::VirtualHost, SITE, MB, 0));
    store(&catalog, sample_snapshot(0, ResourceKind::VirtualHost, SITE, MB, 120));
    store(&catalog, sample_snapshot(0, ResourceKind::VirtualHost, "blog.example.com", MB, 60));
    store(&catalog, sample_snapshot(0, ResourceKind::VirtualHost, SITE, MB, 60));

    let ids: Vec<u64> = catalog
        .list_by_resource(ResourceKind::VirtualHost, Some(SITE))
        .unwrap()
        .iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![2, 4, 1]);
}

#[rstest]
#[case::three_completed(vec![10, 12, 11], 3, 33)]
#[case::single(vec![7], 1, 7)]
#[case::empty_artifacts(vec![0, 0], 2, 0)]
fn test_stats_per_kind(#[case] sizes: Vec<u64>, #[case] count: usize, #[case] total_mb: u64) {
    let catalog = MemoryCatalog::new();
    let mut last = None;
    for (i, size) in sizes.iter().enumerate() {
        let stored = store(
            &catalog,
            sample_snapshot(0, ResourceKind::Database, DATABASE, size * MB, i as i64 * 60),
        );
        last = stored.completed_at;
    }

    let stats = catalog.stats().unwrap();
    let database = &stats[&ResourceKind::Database];
    assert_eq!(database.count, count);
    assert_eq!(database.total_bytes, total_mb * MB);
    assert_eq!(database.last_snapshot, last);
    assert!(!stats.contains_key(&ResourceKind::VirtualHost));
}

#[test]
fn test_stats_count_failed_records_but_not_their_time() {
    let catalog = MemoryCatalog::new();
    let completed = store(&catalog, sample_snapshot(0, ResourceKind::DnsZone, "example.com", MB, 0));

    let mut failed = sample_snapshot(0, ResourceKind::DnsZone, "example.com", 0, 600);
    failed.status = SnapshotStatus::Failed;
    failed.error = Some("zone file missing".to_string());
    store(&catalog, failed);

    let stats = catalog.stats().unwrap();
    let dns = &stats[&ResourceKind::DnsZone];
    assert_eq!(dns.count, 2);
    assert_eq!(dns.total_bytes, MB);
    assert_eq!(dns.last_snapshot, completed.completed_at);
}

#[test]
fn test_stats_serialize_camel_case() {
    let catalog = MemoryCatalog::new();
    store(&catalog, sample_snapshot(0, ResourceKind::VirtualHost, SITE, 2 * MB, 0));

    let json = serde_json::to_value(catalog.stats().unwrap()).unwrap();
    assert_eq!(json["virtualHost"]["count"], 1);
    assert_eq!(json["virtualHost"]["totalBytes"], 2 * MB);
    assert!(json["virtualHost"]["lastSnapshot"].is_string());
}
