//! Count-based retention
//!
//! Keeps the newest `max` snapshots of one (kind, ref) pair and removes the
//! rest, artifact first and catalog record second. A record whose artifact
//! could not be removed stays in the catalog so the leftover is visible and
//! the next prune retries it.
//!
//! Failed records count toward the limit like any other, so a run of failed
//! backups can push older completed snapshots out; such a prune logs a
//! warning and reports the count in `displaced_completed`.

use crate::catalog::{resource_label, ResourceKind, Snapshot, SnapshotCatalog, SnapshotStatus};
use crate::error::SnapshotError;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A snapshot retention wanted gone but could not remove
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneFailure {
    pub snapshot_id: u64,
    pub artifact_path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub resource_kind: ResourceKind,
    pub resource_ref: Option<String>,
    pub kept: usize,
    pub deleted: Vec<u64>,
    pub failures: Vec<PruneFailure>,
    /// Completed snapshots removed while failed ones were kept
    pub displaced_completed: usize,
}

impl PruneReport {
    pub fn resource_label(&self) -> String {
        resource_label(self.resource_kind, self.resource_ref.as_deref())
    }
}

pub struct RetentionManager {
    catalog: Arc<dyn SnapshotCatalog>,
}

impl RetentionManager {
    pub fn new(catalog: Arc<dyn SnapshotCatalog>) -> Self {
        Self { catalog }
    }

    /// Keep the newest `max_snapshots` of one resource, remove the rest
    pub fn prune(
        &self,
        kind: ResourceKind,
        resource_ref: Option<&str>,
        max_snapshots: usize,
    ) -> Result<PruneReport, SnapshotError> {
        let snapshots = self.catalog.list_by_resource(kind, resource_ref)?;
        let kept = snapshots.len().min(max_snapshots);

        let mut report = PruneReport {
            resource_kind: kind,
            resource_ref: resource_ref.map(str::to_string),
            kept,
            deleted: Vec::new(),
            failures: Vec::new(),
            displaced_completed: 0,
        };

        if snapshots.len() <= max_snapshots {
            debug!(
                "{}: {} snapshot(s), nothing to prune (max {})",
                report.resource_label(),
                snapshots.len(),
                max_snapshots
            );
            return Ok(report);
        }

        let (retained, expired) = snapshots.split_at(max_snapshots);
        let kept_failed = count_status(retained, SnapshotStatus::Failed);
        if kept_failed > 0 {
            report.displaced_completed = count_status(expired, SnapshotStatus::Completed);
        }
        if report.displaced_completed > 0 {
            warn!(
                "{}: removing {} completed snapshot(s) while keeping {} failed one(s)",
                report.resource_label(),
                report.displaced_completed,
                kept_failed
            );
        }

        for snapshot in expired {
            match self.remove_snapshot(snapshot) {
                Ok(()) => report.deleted.push(snapshot.id),
                Err(SnapshotError::Catalog(e)) => return Err(SnapshotError::Catalog(e)),
                Err(e) => {
                    warn!(
                        "Retention could not remove snapshot {} ({:?}): {}",
                        snapshot.id, snapshot.artifact_path, e
                    );
                    report.failures.push(PruneFailure {
                        snapshot_id: snapshot.id,
                        artifact_path: snapshot.artifact_path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Pruned {}: kept {}, deleted {}, failed {}",
            report.resource_label(),
            report.kept,
            report.deleted.len(),
            report.failures.len()
        );

        Ok(report)
    }

    /// Remove the artifact, then the record
    ///
    /// An artifact that is already gone does not stop the record removal.
    pub fn remove_snapshot(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        match fs::remove_file(&snapshot.artifact_path) {
            Ok(()) => debug!("Removed artifact {:?}", snapshot.artifact_path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(
                    "Artifact {:?} already missing, removing record {}",
                    snapshot.artifact_path, snapshot.id
                );
            }
            Err(e) => {
                return Err(SnapshotError::io(
                    format!("Failed to remove artifact {:?}", snapshot.artifact_path),
                    e,
                ));
            }
        }

        self.catalog.delete(snapshot.id)?;
        Ok(())
    }

    /// Every (kind, ref) pair that has at least one record
    pub fn resource_groups(&self) -> Result<Vec<(ResourceKind, Option<String>)>, SnapshotError> {
        let groups: BTreeSet<(ResourceKind, Option<String>)> = self
            .catalog
            .list_all()?
            .into_iter()
            .map(|s| (s.resource_kind, s.resource_ref))
            .collect();
        Ok(groups.into_iter().collect())
    }
}

fn count_status(snapshots: &[Snapshot], status: SnapshotStatus) -> usize {
    snapshots.iter().filter(|s| s.status == status).count()
}
