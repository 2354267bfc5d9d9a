//! Backup/restore strategies and the per-kind dispatch table

pub mod composite;
pub mod database;
pub mod tree;

pub use composite::CompositeStrategy;
pub use database::DatabaseStrategy;
pub use tree::TreeStrategy;

use crate::catalog::{ComponentOutcome, ResourceKind};
use crate::error::SnapshotError;
use crate::locator::ResourceSource;
use crate::platform::Platform;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Trait for snapshot strategies
pub trait SnapshotStrategy: Send + Sync {
    /// Get strategy name (for logging)
    fn name(&self) -> &'static str;

    /// Artifact file extension, without the leading dot
    fn extension(&self) -> &'static str;

    /// Write the artifact for `source` to `artifact`
    fn build(
        &self,
        source: &ResourceSource,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<BuildOutput, SnapshotError>;

    /// Bring the live resource described by `source` back from `artifact`
    fn restore(
        &self,
        source: &ResourceSource,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<MergeOutcome, SnapshotError>;
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    /// Per-component outcomes; empty for single-part strategies
    pub components: Vec<ComponentOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "detail", rename_all = "lowercase")]
pub enum FileAction {
    /// Staged copy written over the live file
    Restored,
    /// No live file at that path; left absent
    Skipped,
    Failed(String),
}

/// What happened to one staged file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    #[serde(flatten)]
    pub action: FileAction,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub files: Vec<FileOutcome>,
    pub components: Vec<ComponentOutcome>,
}

impl MergeOutcome {
    pub fn failed_files(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.action, FileAction::Failed(_)))
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_files() > 0 || self.components.iter().any(|c| c.status == crate::catalog::ComponentStatus::Failed)
    }
}

/// How a kind's state is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceShape {
    Tree,
    Database,
    Composite,
}

impl ResourceShape {
    pub fn of(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Database => ResourceShape::Database,
            ResourceKind::FullSystem => ResourceShape::Composite,
            _ => ResourceShape::Tree,
        }
    }
}

#[derive(Clone)]
pub struct StrategyEntry {
    pub strategy: Arc<dyn SnapshotStrategy>,
    /// Service reloaded after a complete restore
    pub reload: Option<String>,
}

/// Lookup table from resource kind to strategy and reload hook
#[derive(Clone)]
pub struct StrategyTable {
    entries: HashMap<ResourceKind, StrategyEntry>,
}

impl StrategyTable {
    pub fn new(
        platform: Arc<dyn Platform>,
        staging_root: PathBuf,
        reload_services: &HashMap<ResourceKind, String>,
    ) -> Self {
        let tree = Arc::new(TreeStrategy::new(platform.clone(), staging_root.clone()));
        let database = Arc::new(DatabaseStrategy::new(platform.clone()));
        let composite = Arc::new(CompositeStrategy::new(platform, staging_root));

        let entries = ResourceKind::ALL
            .into_iter()
            .map(|kind| {
                let strategy: Arc<dyn SnapshotStrategy> = match ResourceShape::of(kind) {
                    ResourceShape::Tree => tree.clone(),
                    ResourceShape::Database => database.clone(),
                    ResourceShape::Composite => composite.clone(),
                };
                let entry = StrategyEntry {
                    strategy,
                    reload: reload_services.get(&kind).cloned(),
                };
                (kind, entry)
            })
            .collect();

        Self { entries }
    }

    pub fn get(&self, kind: ResourceKind) -> Result<&StrategyEntry, SnapshotError> {
        self.entries
            .get(&kind)
            .ok_or_else(|| SnapshotError::ResourceNotFound(format!("No strategy for {}", kind)))
    }
}
