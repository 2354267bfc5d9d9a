//! Directory-tree strategy
//!
//! Backup packages the whole root into one compressed archive. Restore
//! extracts into a private staging directory and, for every file the archive
//! lists, copies the staged copy over the live tree only where that path
//! already exists as a regular file. Files deleted from the live tree since
//! the snapshot are not recreated.

use super::{BuildOutput, FileAction, FileOutcome, MergeOutcome, SnapshotStrategy};
use crate::error::SnapshotError;
use crate::locator::ResourceSource;
use crate::platform::{archive, ArchiveFormat, Platform};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct TreeStrategy {
    platform: Arc<dyn Platform>,
    staging_root: PathBuf,
}

impl TreeStrategy {
    pub fn new(platform: Arc<dyn Platform>, staging_root: PathBuf) -> Self {
        Self {
            platform,
            staging_root,
        }
    }

    fn root<'a>(&self, source: &'a ResourceSource) -> Result<&'a Path, SnapshotError> {
        match source {
            ResourceSource::Tree { root } if root.is_dir() => Ok(root),
            ResourceSource::Tree { root } => Err(SnapshotError::ResourceNotFound(format!(
                "{} does not exist",
                root.display()
            ))),
            other => Err(SnapshotError::ResourceNotFound(format!(
                "Expected a directory tree, got {:?}",
                other
            ))),
        }
    }
}

impl SnapshotStrategy for TreeStrategy {
    fn name(&self) -> &'static str {
        "tree"
    }

    fn extension(&self) -> &'static str {
        ArchiveFormat::TarGz.extension()
    }

    fn build(
        &self,
        source: &ResourceSource,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<BuildOutput, SnapshotError> {
        let root = self.root(source)?;
        let size = self
            .platform
            .package_tree(root, artifact, ArchiveFormat::TarGz, cancel)?;

        info!("Packaged {:?}: {} files, {} bytes", root, size.files, size.bytes);
        Ok(BuildOutput::default())
    }

    fn restore(
        &self,
        source: &ResourceSource,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<MergeOutcome, SnapshotError> {
        let live_root = self.root(source)?;

        if !artifact.is_file() {
            return Err(SnapshotError::ArtifactNotFound(artifact.to_path_buf()));
        }

        // Dropped on every path out of this function, removing the directory
        let staging = stage_dir(&self.staging_root, "restore")?;
        self.platform
            .extract_tree(artifact, staging.path(), ArchiveFormat::TarGz, cancel)?;

        let listed = archive::list_files(artifact, ArchiveFormat::TarGz)?;
        let files = merge_staged(staging.path(), &listed, live_root, cancel)?;
        Ok(MergeOutcome {
            files,
            components: Vec::new(),
        })
    }
}

/// Create a uniquely named staging directory under `staging_root`
pub fn stage_dir(staging_root: &Path, label: &str) -> Result<TempDir, SnapshotError> {
    fs::create_dir_all(staging_root).map_err(|e| {
        SnapshotError::io(format!("Failed to create staging root {:?}", staging_root), e)
    })?;

    tempfile::Builder::new()
        .prefix(&format!("{}-", label))
        .tempdir_in(staging_root)
        .map_err(|e| SnapshotError::io("Failed to create staging directory", e))
}

/// Copy the staged copies of `files` over existing live files
///
/// Never creates live files. A listed file the extraction did not produce
/// fails only where its live counterpart exists.
pub fn merge_staged(
    staging: &Path,
    files: &[PathBuf],
    live_root: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<FileOutcome>, SnapshotError> {
    let mut outcomes = Vec::with_capacity(files.len());

    for relative in files {
        if cancel.is_cancelled() {
            return Err(SnapshotError::Cancelled);
        }

        let target = live_root.join(&relative);
        let action = match fs::symlink_metadata(&target) {
            Ok(meta) if meta.file_type().is_file() => {
                match fs::copy(staging.join(&relative), &target) {
                    Ok(_) => {
                        debug!("Restored {:?}", relative);
                        FileAction::Restored
                    }
                    Err(e) => {
                        warn!("Failed to restore {:?}: {}", relative, e);
                        FileAction::Failed(e.to_string())
                    }
                }
            }
            Ok(_) => {
                debug!("Skipped {:?}: live path is not a regular file", relative);
                FileAction::Skipped
            }
            Err(_) => {
                debug!("Skipped {:?}: not present in live tree", relative);
                FileAction::Skipped
            }
        };

        outcomes.push(FileOutcome {
            path: relative.clone(),
            action,
        });
    }

    Ok(outcomes)
}
