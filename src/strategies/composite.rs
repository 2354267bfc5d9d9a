//! fullSystem strategy
//!
//! Builds the files, database and config components independently, bundles
//! whichever succeeded into one plain tar, and restores each component found
//! in a bundle on its own. A failing component never stops the others.

use super::tree::stage_dir;
use super::{BuildOutput, DatabaseStrategy, FileOutcome, MergeOutcome, SnapshotStrategy, TreeStrategy};
use crate::catalog::ComponentOutcome;
use crate::error::SnapshotError;
use crate::locator::{DatabaseConnection, ResourceSource};
use crate::platform::{archive, ArchiveFormat, Platform};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const FILES: &str = "files";
const DATABASE: &str = "database";
const CONFIG: &str = "config";

pub struct CompositeStrategy {
    platform: Arc<dyn Platform>,
    tree: TreeStrategy,
    database: DatabaseStrategy,
    staging_root: PathBuf,
}

struct Parts<'a> {
    files_root: &'a Path,
    database: Option<&'a DatabaseConnection>,
    config_root: &'a Path,
}

impl CompositeStrategy {
    pub fn new(platform: Arc<dyn Platform>, staging_root: PathBuf) -> Self {
        Self {
            tree: TreeStrategy::new(platform.clone(), staging_root.clone()),
            database: DatabaseStrategy::new(platform.clone()),
            platform,
            staging_root,
        }
    }

    fn parts<'a>(&self, source: &'a ResourceSource) -> Result<Parts<'a>, SnapshotError> {
        match source {
            ResourceSource::Composite {
                files_root,
                database,
                config_root,
            } => Ok(Parts {
                files_root,
                database: database.as_ref(),
                config_root,
            }),
            other => Err(SnapshotError::ResourceNotFound(format!(
                "Expected fullSystem sources, got {:?}",
                other
            ))),
        }
    }

    /// Member file name of a component inside the bundle
    fn member_name(component: &str) -> String {
        match component {
            DATABASE => format!("{}.sql", DATABASE),
            other => format!("{}.{}", other, ArchiveFormat::TarGz.extension()),
        }
    }

    /// Sources of each component, in bundle order
    fn components(parts: &Parts<'_>) -> Vec<(&'static str, Option<ResourceSource>)> {
        vec![
            (
                FILES,
                Some(ResourceSource::Tree {
                    root: parts.files_root.to_path_buf(),
                }),
            ),
            (
                DATABASE,
                parts.database.map(|conn| {
                    let mut all = conn.clone();
                    all.database = None;
                    ResourceSource::Database(all)
                }),
            ),
            (
                CONFIG,
                Some(ResourceSource::Tree {
                    root: parts.config_root.to_path_buf(),
                }),
            ),
        ]
    }

    fn strategy_for(&self, component: &str) -> &dyn SnapshotStrategy {
        match component {
            DATABASE => &self.database,
            _ => &self.tree,
        }
    }
}

impl SnapshotStrategy for CompositeStrategy {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn extension(&self) -> &'static str {
        ArchiveFormat::Tar.extension()
    }

    fn build(
        &self,
        source: &ResourceSource,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<BuildOutput, SnapshotError> {
        let parts = self.parts(source)?;
        let staging = stage_dir(&self.staging_root, "fullsystem")?;

        let mut outcomes = Vec::new();
        let mut members: Vec<(PathBuf, String)> = Vec::new();

        for (component, component_source) in Self::components(&parts) {
            let Some(component_source) = component_source else {
                outcomes.push(ComponentOutcome::skipped(component, "no connection configured"));
                continue;
            };

            let name = Self::member_name(component);
            let path = staging.path().join(&name);

            match self.strategy_for(component).build(&component_source, &path, cancel) {
                Ok(_) => {
                    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                    info!("fullSystem component {} built ({} bytes)", component, size);
                    outcomes.push(ComponentOutcome::succeeded(component, size));
                    members.push((path, name));
                }
                Err(SnapshotError::Cancelled) => return Err(SnapshotError::Cancelled),
                Err(e) => {
                    warn!("fullSystem component {} failed: {}", component, e);
                    outcomes.push(ComponentOutcome::failed(component, &e));
                }
            }
        }

        if members.is_empty() {
            return Err(SnapshotError::CompositeFailed(outcomes));
        }

        let refs: Vec<(&Path, &str)> = members
            .iter()
            .map(|(path, name)| (path.as_path(), name.as_str()))
            .collect();
        archive::write_bundle(artifact, &refs, cancel)?;

        Ok(BuildOutput { components: outcomes })
    }

    fn restore(
        &self,
        source: &ResourceSource,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<MergeOutcome, SnapshotError> {
        let parts = self.parts(source)?;

        if !artifact.is_file() {
            return Err(SnapshotError::ArtifactNotFound(artifact.to_path_buf()));
        }

        let staging = stage_dir(&self.staging_root, "fullsystem-restore")?;
        self.platform
            .extract_tree(artifact, staging.path(), ArchiveFormat::Tar, cancel)?;

        let mut merged = MergeOutcome::default();
        let mut attempted = 0;

        for (component, component_source) in Self::components(&parts) {
            let member = staging.path().join(Self::member_name(component));
            if !member.is_file() {
                merged
                    .components
                    .push(ComponentOutcome::skipped(component, "not present in snapshot"));
                continue;
            }

            let Some(component_source) = component_source else {
                merged
                    .components
                    .push(ComponentOutcome::skipped(component, "no connection configured"));
                continue;
            };

            attempted += 1;
            match self.strategy_for(component).restore(&component_source, &member, cancel) {
                Ok(outcome) => {
                    let failed = outcome.failed_files();
                    let total = outcome.files.len();
                    merged.files.extend(outcome.files.into_iter().map(|f| FileOutcome {
                        path: Path::new(component).join(f.path),
                        action: f.action,
                    }));

                    if failed > 0 {
                        let err = SnapshotError::PartialMerge { failed, total };
                        merged.components.push(ComponentOutcome::failed(component, &err));
                    } else {
                        merged.components.push(ComponentOutcome::succeeded(component, 0));
                    }
                }
                Err(SnapshotError::Cancelled) => return Err(SnapshotError::Cancelled),
                Err(e) => {
                    warn!("fullSystem component {} restore failed: {}", component, e);
                    merged.components.push(ComponentOutcome::failed(component, &e));
                }
            }
        }

        let any_succeeded = merged.components.iter().any(ComponentOutcome::is_success);
        if attempted > 0 && !any_succeeded {
            return Err(SnapshotError::CompositeFailed(merged.components));
        }

        Ok(merged)
    }
}
