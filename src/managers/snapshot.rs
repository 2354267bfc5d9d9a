//! Snapshot manager - the public backup, restore and retention operations
//!
//! Every mutating operation holds the per-resource lock for its whole
//! duration. Backups write to `<artifact>.partial` and rename into place, so
//! a restore never sees a half-written artifact.

use crate::catalog::{
    resource_label, CategoryStats, ComponentOutcome, JsonCatalog, NewSnapshot, ResourceKind,
    Snapshot, SnapshotCatalog, SnapshotStatus,
};
use crate::config::{resolve_settings, Config, ResolvedSettings, RetentionPolicy};
use crate::error::SnapshotError;
use crate::locator::{validate_ref, ConfigLocator, ResourceLocator, ResourceSource};
use crate::managers::notification::{DiscordNotifier, NoopNotifier, Notifier, SnapshotEvent};
use crate::managers::retention::{PruneReport, RetentionManager};
use crate::platform::{self, archive, ArchiveFormat, Platform};
use crate::strategies::{FileAction, FileOutcome, ResourceShape, StrategyTable};
use crate::utils::fs::{sanitize_component, tree_size, with_suffix, TreeSize};
use crate::utils::locker::ResourceLock;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Timestamp component of artifact names, second precision
const ARTIFACT_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Paths and policies the manager runs with
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub backup_root: PathBuf,
    pub staging_dir: PathBuf,
    pub lock_directory: PathBuf,
    pub retention: RetentionPolicy,
    pub reload_services: HashMap<ResourceKind, String>,
}

impl ManagerSettings {
    /// Settings rooted at `backup_root` with staging and locks beneath it
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        let backup_root = backup_root.into();
        Self {
            staging_dir: backup_root.join(".staging"),
            lock_directory: backup_root.join(".locks"),
            backup_root,
            retention: RetentionPolicy::default(),
            reload_services: HashMap::new(),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_reload_services(mut self, reload_services: HashMap<ResourceKind, String>) -> Self {
        self.reload_services = reload_services;
        self
    }
}

impl From<&ResolvedSettings> for ManagerSettings {
    fn from(settings: &ResolvedSettings) -> Self {
        Self {
            backup_root: settings.backup_root.clone(),
            staging_dir: settings.staging_dir.clone(),
            lock_directory: settings.lock_directory.clone(),
            retention: settings.retention.clone(),
            reload_services: settings.reload_services.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreStatus {
    /// Every staged file and component came back
    Complete,
    /// Some files or components failed; see the outcome lists
    Partial,
}

/// Result of the post-restore service reload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReloadOutcome {
    pub service: String,
    pub success: bool,
    pub message: String,
}

/// What a restore did, file by file
///
/// Restore only overwrites files that still exist in the live tree; files
/// listed as `skipped` were in the snapshot but are not recreated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub snapshot_id: u64,
    pub resource_kind: ResourceKind,
    pub resource_ref: Option<String>,
    pub status: RestoreStatus,
    pub restored: usize,
    pub skipped: usize,
    pub failed: usize,
    pub files: Vec<FileOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reload: Option<ReloadOutcome>,
    pub duration_secs: u64,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.status == RestoreStatus::Complete
    }

    /// The partial-merge condition as an error value, if there was one
    pub fn partial_error(&self) -> Option<SnapshotError> {
        (self.failed > 0).then(|| SnapshotError::PartialMerge {
            failed: self.failed,
            total: self.files.len(),
        })
    }
}

/// Result of checking one snapshot's artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub snapshot_id: u64,
    pub artifact_path: PathBuf,
    pub artifact_exists: bool,
    pub recorded_bytes: u64,
    pub actual_bytes: Option<u64>,
    pub readable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<TreeSize>,
    pub size_updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.artifact_exists && self.readable && self.actual_bytes == Some(self.recorded_bytes)
    }
}

pub struct SnapshotManager {
    settings: ManagerSettings,
    catalog: Arc<dyn SnapshotCatalog>,
    locator: Arc<dyn ResourceLocator>,
    platform: Arc<dyn Platform>,
    strategies: StrategyTable,
    retention: RetentionManager,
    notifier: Arc<dyn Notifier>,
}

impl SnapshotManager {
    /// Create new snapshot manager with a no-op notifier
    pub fn new(
        settings: ManagerSettings,
        catalog: Arc<dyn SnapshotCatalog>,
        locator: Arc<dyn ResourceLocator>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        let strategies = StrategyTable::new(
            platform.clone(),
            settings.staging_dir.clone(),
            &settings.reload_services,
        );

        Self {
            retention: RetentionManager::new(catalog.clone()),
            settings,
            catalog,
            locator,
            platform,
            strategies,
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Wire up the real catalog, locator, platform and notifier from a config
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let resolved = resolve_settings(config).context("Failed to resolve configuration")?;

        let catalog = JsonCatalog::open(&resolved.catalog_file).with_context(|| {
            format!("Failed to open snapshot catalog {:?}", resolved.catalog_file)
        })?;

        let notifier: Arc<dyn Notifier> = if config.notifications.discord_webhook_url.is_empty() {
            Arc::new(NoopNotifier)
        } else {
            Arc::new(DiscordNotifier::new(config.notifications.clone()))
        };

        Ok(Self::new(
            ManagerSettings::from(&resolved),
            Arc::new(catalog),
            Arc::new(ConfigLocator::from_settings(&resolved)),
            platform::native(resolved.operation_timeout),
        )
        .with_notifier(notifier))
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &Arc<dyn SnapshotCatalog> {
        &self.catalog
    }

    fn lock(&self, kind: ResourceKind, resource_ref: Option<&str>) -> Result<ResourceLock, SnapshotError> {
        ResourceLock::acquire(&self.settings.lock_directory, kind, resource_ref)
    }

    /// Back up one resource, record it, then apply retention to that resource
    pub fn create_snapshot(
        &self,
        kind: ResourceKind,
        resource_ref: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Snapshot, SnapshotError> {
        validate_ref(kind, resource_ref)?;
        let _lock = self.lock(kind, resource_ref)?;

        let label = resource_label(kind, resource_ref);
        let entry = self.strategies.get(kind)?;
        let created_at = Utc::now();
        let artifact_path =
            self.allocate_artifact_path(kind, resource_ref, entry.strategy.extension(), created_at)?;

        let mut snapshot = self.catalog.insert(NewSnapshot {
            resource_kind: kind,
            resource_ref: resource_ref.map(str::to_string),
            artifact_path: artifact_path.clone(),
            created_at,
        })?;

        info!(
            "Starting {} snapshot {} of '{}' -> {:?}",
            entry.strategy.name(),
            snapshot.id,
            label,
            artifact_path
        );
        let start_time = Instant::now();

        let partial_path = with_suffix(&artifact_path, ".partial");
        let built = self
            .locator
            .locate(kind, resource_ref)
            .and_then(|source| entry.strategy.build(&source, &partial_path, cancel))
            .and_then(|output| {
                fs::rename(&partial_path, &artifact_path).map_err(|e| {
                    SnapshotError::io(format!("Failed to move artifact into {:?}", artifact_path), e)
                })?;
                let size = fs::metadata(&artifact_path)
                    .map_err(|e| SnapshotError::io(format!("Failed to stat {:?}", artifact_path), e))?
                    .len();
                Ok((output, size))
            });

        let duration_secs = start_time.elapsed().as_secs();

        let (output, size_bytes) = match built {
            Ok(built) => built,
            Err(e) => {
                remove_leftover(&partial_path);
                error!("Snapshot {} of '{}' failed: {}", snapshot.id, label, e);

                snapshot.status = SnapshotStatus::Failed;
                snapshot.error = Some(e.to_string());
                if let SnapshotError::CompositeFailed(ref components) = e {
                    snapshot.components = components.clone();
                }
                if let Err(catalog_err) = self.catalog.update(&snapshot) {
                    warn!("Failed to mark snapshot {} as failed: {}", snapshot.id, catalog_err);
                }

                self.notifier.notify(&SnapshotEvent::BackupFailed {
                    kind,
                    resource_ref: resource_ref.map(str::to_string),
                    error: e.to_string(),
                    duration_secs,
                });
                return Err(e);
            }
        };

        snapshot.status = SnapshotStatus::Completed;
        snapshot.size_bytes = size_bytes;
        snapshot.completed_at = Some(Utc::now());
        snapshot.components = output.components;
        self.catalog.update(&snapshot)?;

        info!(
            "Snapshot {} of '{}' completed: {} bytes in {}s",
            snapshot.id, label, size_bytes, duration_secs
        );

        self.notifier.notify(&SnapshotEvent::BackupCompleted {
            kind,
            resource_ref: resource_ref.map(str::to_string),
            snapshot_id: snapshot.id,
            size_bytes,
            duration_secs,
        });

        // Cleanup trouble never fails the backup that triggered it
        match self
            .retention
            .prune(kind, resource_ref, self.settings.retention.max_for(kind))
        {
            Ok(report) => self.notify_prune_failures(&report),
            Err(e) => warn!("Retention after snapshot {} failed: {}", snapshot.id, e),
        }

        Ok(snapshot)
    }

    /// `<root>/<kind>/<ref>/<kind>_<ref>_<time>[-N].<ext>`, unused on disk and in the catalog
    fn allocate_artifact_path(
        &self,
        kind: ResourceKind,
        resource_ref: Option<&str>,
        extension: &str,
        created_at: DateTime<Utc>,
    ) -> Result<PathBuf, SnapshotError> {
        let mut dir = self.settings.backup_root.join(kind.as_str());
        let timestamp = created_at.format(ARTIFACT_TIME_FORMAT);
        let stem = match resource_ref {
            Some(r) => {
                let r = sanitize_component(r);
                dir.push(&r);
                format!("{}_{}_{}", kind, r, timestamp)
            }
            None => format!("{}_{}", kind, timestamp),
        };

        fs::create_dir_all(&dir)
            .map_err(|e| SnapshotError::io(format!("Failed to create backup directory {:?}", dir), e))?;

        let recorded: HashSet<PathBuf> = self
            .catalog
            .list_by_resource(kind, resource_ref)?
            .into_iter()
            .map(|s| s.artifact_path)
            .collect();

        let taken = |path: &Path| {
            path.exists() || with_suffix(path, ".partial").exists() || recorded.contains(path)
        };

        let mut candidate = dir.join(format!("{}.{}", stem, extension));
        let mut counter = 1;
        while taken(&candidate) {
            candidate = dir.join(format!("{}-{}.{}", stem, counter, extension));
            counter += 1;
        }

        Ok(candidate)
    }

    /// Snapshots of one resource, newest first
    pub fn list_snapshots(
        &self,
        kind: ResourceKind,
        resource_ref: Option<&str>,
    ) -> Result<Vec<Snapshot>, SnapshotError> {
        validate_ref(kind, resource_ref)?;
        Ok(self.catalog.list_by_resource(kind, resource_ref)?)
    }

    pub fn get_snapshot(&self, id: u64) -> Result<Snapshot, SnapshotError> {
        self.catalog
            .get(id)?
            .ok_or(SnapshotError::SnapshotNotFound(id))
    }

    /// Bring a resource back from one of its snapshots
    ///
    /// Only files still present in the live tree are overwritten. The reload
    /// hook runs once, and only when nothing failed.
    pub fn restore_snapshot(
        &self,
        kind: ResourceKind,
        resource_ref: Option<&str>,
        snapshot_id: u64,
        cancel: &CancellationToken,
    ) -> Result<RestoreReport, SnapshotError> {
        validate_ref(kind, resource_ref)?;

        let snapshot = self.get_snapshot(snapshot_id)?;
        if !snapshot.belongs_to(kind, resource_ref) {
            warn!(
                "Snapshot {} belongs to '{}', not '{}'",
                snapshot_id,
                snapshot.resource_label(),
                resource_label(kind, resource_ref)
            );
            return Err(SnapshotError::SnapshotNotFound(snapshot_id));
        }
        if snapshot.status != SnapshotStatus::Completed {
            return Err(SnapshotError::ArtifactNotFound(snapshot.artifact_path));
        }

        let _lock = self.lock(kind, resource_ref)?;
        let label = snapshot.resource_label();
        let entry = self.strategies.get(kind)?;

        info!("Restoring '{}' from snapshot {}", label, snapshot_id);
        let start_time = Instant::now();

        let merged = match self
            .locator
            .locate(kind, resource_ref)
            .and_then(|source| entry.strategy.restore(&source, &snapshot.artifact_path, cancel))
        {
            Ok(merged) => merged,
            Err(e) => {
                error!("Restore of '{}' from snapshot {} failed: {}", label, snapshot_id, e);
                self.notifier.notify(&SnapshotEvent::RestoreFailed {
                    kind,
                    resource_ref: resource_ref.map(str::to_string),
                    snapshot_id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let count = |wanted: fn(&FileAction) -> bool| {
            merged.files.iter().filter(|f| wanted(&f.action)).count()
        };
        let restored = count(|a| matches!(a, FileAction::Restored));
        let skipped = count(|a| matches!(a, FileAction::Skipped));
        let failed = count(|a| matches!(a, FileAction::Failed(_)));

        let status = if merged.has_failures() {
            RestoreStatus::Partial
        } else {
            RestoreStatus::Complete
        };

        let reload = match (&entry.reload, status) {
            (Some(service), RestoreStatus::Complete) => Some(self.reload(service, cancel)),
            (Some(service), RestoreStatus::Partial) => {
                warn!("Not reloading {} after a partial restore of '{}'", service, label);
                None
            }
            (None, _) => None,
        };

        let report = RestoreReport {
            snapshot_id,
            resource_kind: kind,
            resource_ref: resource_ref.map(str::to_string),
            status,
            restored,
            skipped,
            failed,
            files: merged.files,
            components: merged.components,
            reload,
            duration_secs: start_time.elapsed().as_secs(),
        };

        info!(
            "Restore of '{}' from snapshot {}: {} restored, {} skipped, {} failed",
            label, snapshot_id, restored, skipped, failed
        );

        self.notifier.notify(&SnapshotEvent::RestoreCompleted {
            kind,
            resource_ref: resource_ref.map(str::to_string),
            snapshot_id,
            restored,
            skipped,
            failed,
            partial: status == RestoreStatus::Partial,
        });

        Ok(report)
    }

    fn reload(&self, service: &str, cancel: &CancellationToken) -> ReloadOutcome {
        match self.platform.reload_service(service, cancel) {
            Ok(()) => {
                info!("Reloaded {}", service);
                ReloadOutcome {
                    service: service.to_string(),
                    success: true,
                    message: "reloaded".to_string(),
                }
            }
            Err(e) => {
                warn!("Failed to reload {}: {}", service, e);
                ReloadOutcome {
                    service: service.to_string(),
                    success: false,
                    message: e.to_string(),
                }
            }
        }
    }

    /// Remove a snapshot's artifact and record
    ///
    /// An artifact already gone from disk is not an error.
    pub fn delete_snapshot(&self, id: u64) -> Result<(), SnapshotError> {
        let snapshot = self.get_snapshot(id)?;
        let _lock = self.lock(snapshot.resource_kind, snapshot.resource_ref.as_deref())?;

        self.retention.remove_snapshot(&snapshot)?;
        info!("Deleted snapshot {} of '{}'", id, snapshot.resource_label());
        Ok(())
    }

    /// Apply retention to one resource with an explicit limit
    pub fn prune(
        &self,
        kind: ResourceKind,
        resource_ref: Option<&str>,
        max_snapshots: usize,
    ) -> Result<PruneReport, SnapshotError> {
        validate_ref(kind, resource_ref)?;
        let _lock = self.lock(kind, resource_ref)?;

        let report = self.retention.prune(kind, resource_ref, max_snapshots)?;
        self.notify_prune_failures(&report);
        Ok(report)
    }

    /// Apply each kind's configured limit to every resource in the catalog
    ///
    /// Resources locked by another operation are skipped.
    pub fn prune_all(&self) -> Result<Vec<PruneReport>, SnapshotError> {
        let mut reports = Vec::new();

        for (kind, resource_ref) in self.retention.resource_groups()? {
            let label = resource_label(kind, resource_ref.as_deref());

            let _lock = match self.lock(kind, resource_ref.as_deref()) {
                Ok(lock) => lock,
                Err(SnapshotError::ResourceBusy(_)) => {
                    warn!("Skipping prune of '{}': resource is busy", label);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let report = self.retention.prune(
                kind,
                resource_ref.as_deref(),
                self.settings.retention.max_for(kind),
            )?;
            self.notify_prune_failures(&report);
            reports.push(report);
        }

        Ok(reports)
    }

    fn notify_prune_failures(&self, report: &PruneReport) {
        if report.failures.is_empty() {
            return;
        }

        let detail = report
            .failures
            .iter()
            .map(|f| format!("#{}: {}", f.snapshot_id, f.error))
            .collect::<Vec<_>>()
            .join("; ");

        self.notifier.notify(&SnapshotEvent::PruneFailed {
            kind: report.resource_kind,
            resource_ref: report.resource_ref.clone(),
            failures: report.failures.len(),
            detail,
        });
    }

    /// Count, bytes and latest completion per kind, from the catalog alone
    pub fn stats(&self) -> Result<BTreeMap<ResourceKind, CategoryStats>, SnapshotError> {
        Ok(self.catalog.stats()?)
    }

    /// Measure the live resource on disk, independent of any snapshot
    pub fn resource_size(
        &self,
        kind: ResourceKind,
        resource_ref: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TreeSize, SnapshotError> {
        let measure = |root: &Path| {
            if root.is_dir() {
                tree_size(root, cancel)
            } else {
                Err(SnapshotError::ResourceNotFound(format!("{} does not exist", root.display())))
            }
        };

        match self.locator.locate(kind, resource_ref)? {
            ResourceSource::Tree { root } => measure(&root),
            ResourceSource::Composite {
                files_root,
                config_root,
                ..
            } => {
                let files = measure(&files_root)?;
                let config = measure(&config_root)?;
                Ok(TreeSize {
                    files: files.files + config.files,
                    bytes: files.bytes + config.bytes,
                })
            }
            ResourceSource::Database(conn) => Err(SnapshotError::ResourceNotFound(format!(
                "{} is a database and has no on-disk tree to measure",
                conn.target()
            ))),
        }
    }

    /// Check a snapshot's artifact, optionally recording its measured size
    pub fn verify_snapshot(&self, id: u64, update_size: bool) -> Result<VerifyReport, SnapshotError> {
        let mut snapshot = self.get_snapshot(id)?;
        let path = snapshot.artifact_path.clone();

        let mut report = VerifyReport {
            snapshot_id: id,
            artifact_path: path.clone(),
            artifact_exists: false,
            recorded_bytes: snapshot.size_bytes,
            actual_bytes: None,
            readable: false,
            contents: None,
            size_updated: false,
            problem: None,
        };

        let actual = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                report.problem = Some("artifact path is not a file".to_string());
                return Ok(report);
            }
            Err(e) => {
                report.problem = Some(format!("artifact not readable: {}", e));
                return Ok(report);
            }
        };
        report.artifact_exists = true;
        report.actual_bytes = Some(actual);

        let format = match ResourceShape::of(snapshot.resource_kind) {
            ResourceShape::Tree => Some(ArchiveFormat::TarGz),
            ResourceShape::Composite => Some(ArchiveFormat::Tar),
            ResourceShape::Database => None,
        };

        match format {
            Some(format) => match archive::inspect(&path, format) {
                Ok(contents) => {
                    report.readable = true;
                    report.contents = Some(contents);
                }
                Err(e) => report.problem = Some(e.to_string()),
            },
            None if actual == 0 => report.problem = Some("database dump is empty".to_string()),
            None => report.readable = true,
        }

        if actual != snapshot.size_bytes {
            if update_size {
                info!(
                    "Snapshot {}: recorded size {} -> {} bytes",
                    id, snapshot.size_bytes, actual
                );
                snapshot.size_bytes = actual;
                self.catalog.update(&snapshot)?;
                report.recorded_bytes = actual;
                report.size_updated = true;
            } else if report.problem.is_none() {
                report.problem = Some(format!(
                    "recorded size {} differs from {} bytes on disk",
                    snapshot.size_bytes, actual
                ));
            }
        }

        Ok(report)
    }
}

fn remove_leftover(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove incomplete artifact {:?}: {}", path, e);
        }
    }
}
