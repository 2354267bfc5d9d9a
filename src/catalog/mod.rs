//! Snapshot catalog
//!
//! One persisted record per snapshot. Listing and statistics are computed
//! from the records alone and never touch the backup store, so sizes are the
//! ones captured when each artifact was written.

mod store;
mod types;

pub use store::{JsonCatalog, MemoryCatalog};
pub use types::*;

use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to access catalog file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Catalog record {0} does not exist")]
    MissingRecord(u64),
}

/// Storage for snapshot records
pub trait SnapshotCatalog: Send + Sync {
    /// Open a new `pending` record and assign it the next id
    fn insert(&self, new: NewSnapshot) -> Result<Snapshot, CatalogError>;

    /// Replace an existing record
    fn update(&self, snapshot: &Snapshot) -> Result<(), CatalogError>;

    fn get(&self, id: u64) -> Result<Option<Snapshot>, CatalogError>;

    /// Remove a record; returns false if it was already gone
    fn delete(&self, id: u64) -> Result<bool, CatalogError>;

    fn list_all(&self) -> Result<Vec<Snapshot>, CatalogError>;

    /// Snapshots of one resource, newest first
    fn list_by_resource(
        &self,
        kind: ResourceKind,
        resource_ref: Option<&str>,
    ) -> Result<Vec<Snapshot>, CatalogError> {
        let mut snapshots: Vec<Snapshot> = self
            .list_all()?
            .into_iter()
            .filter(|s| s.belongs_to(kind, resource_ref))
            .collect();
        sort_newest_first(&mut snapshots);
        Ok(snapshots)
    }

    /// Count, bytes and latest completion per resource kind
    fn stats(&self) -> Result<BTreeMap<ResourceKind, CategoryStats>, CatalogError> {
        Ok(compute_stats(&self.list_all()?))
    }
}

/// Order by `created_at` descending, ties broken by `id` descending
pub fn sort_newest_first(snapshots: &mut [Snapshot]) {
    snapshots.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

pub fn compute_stats(snapshots: &[Snapshot]) -> BTreeMap<ResourceKind, CategoryStats> {
    let mut stats: BTreeMap<ResourceKind, CategoryStats> = BTreeMap::new();

    for snapshot in snapshots {
        let entry = stats.entry(snapshot.resource_kind).or_default();
        entry.count += 1;
        entry.total_bytes += snapshot.size_bytes;

        if snapshot.status == SnapshotStatus::Completed {
            if let Some(completed_at) = snapshot.completed_at {
                if entry.last_snapshot.map_or(true, |last| completed_at > last) {
                    entry.last_snapshot = Some(completed_at);
                }
            }
        }
    }

    stats
}
