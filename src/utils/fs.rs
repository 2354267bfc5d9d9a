//! Filesystem helpers shared by the tree strategies and the manager

use crate::error::SnapshotError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// File count and byte total of a directory tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSize {
    pub files: u64,
    pub bytes: u64,
}

/// Regular files under `root`, relative to it and sorted
///
/// Symlinks are neither followed nor returned.
pub fn collect_files(root: &Path, cancel: &CancellationToken) -> Result<Vec<PathBuf>, SnapshotError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        if cancel.is_cancelled() {
            return Err(SnapshotError::Cancelled);
        }

        let entry = entry.map_err(|e| {
            let context = format!("Failed to walk {}", root.display());
            match e.into_io_error() {
                Some(io) => SnapshotError::io(context, io),
                None => SnapshotError::Io {
                    context,
                    source: std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"),
                },
            }
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }

    Ok(files)
}

/// Sum the sizes of the regular files under `root`
pub fn tree_size(root: &Path, cancel: &CancellationToken) -> Result<TreeSize, SnapshotError> {
    let mut size = TreeSize::default();

    for relative in collect_files(root, cancel)? {
        let path = root.join(&relative);
        let metadata = std::fs::symlink_metadata(&path)
            .map_err(|e| SnapshotError::io(format!("Failed to stat {}", path.display()), e))?;
        size.files += 1;
        size.bytes += metadata.len();
    }

    Ok(size)
}

/// Reduce a resource reference to `[A-Za-z0-9._@-]`, mapping anything else to `_`
pub fn sanitize_component(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // A bare "." or ".." would escape the directory
    if sanitized.chars().all(|c| c == '.') {
        sanitized.replace('.', "_")
    } else {
        sanitized
    }
}

/// Append `suffix` to the file name of `path`
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
