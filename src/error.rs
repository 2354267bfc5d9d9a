//! Error taxonomy shared by every snapshot operation
//!
//! Each component turns its failures into a [`SnapshotError`]; callers that
//! want a flag-plus-message view use [`OperationResult`].

use crate::catalog::{CatalogError, ComponentOutcome};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;

/// Flat classification of a [`SnapshotError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ResourceNotFound,
    DumpFailed,
    RestoreFailed,
    ArtifactNotFound,
    ArtifactCorrupt,
    StorageExhausted,
    PartialMerge,
    CompositeFailed,
    Cancelled,
    ResourceBusy,
    SnapshotNotFound,
    Catalog,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Dump failed: {0}")]
    DumpFailed(String),

    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    #[error("Artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("Artifact is corrupt: {0}")]
    ArtifactCorrupt(String),

    #[error("Backup store exhausted: {0}")]
    StorageExhausted(String),

    #[error("Partial merge: {failed} of {total} staged files could not be restored")]
    PartialMerge { failed: usize, total: usize },

    #[error("All sub-operations failed: {}", summarize_components(.0))]
    CompositeFailed(Vec<ComponentOutcome>),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Resource '{0}' is busy: another operation holds its lock")]
    ResourceBusy(String),

    #[error("Snapshot {0} not found")]
    SnapshotNotFound(u64),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl SnapshotError {
    /// Wrap an I/O error, classifying a full disk as `StorageExhausted`
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        let context = context.into();
        if is_storage_full(&source) {
            SnapshotError::StorageExhausted(format!("{}: {}", context, source))
        } else {
            SnapshotError::Io { context, source }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapshotError::ResourceNotFound(_) => ErrorKind::ResourceNotFound,
            SnapshotError::DumpFailed(_) => ErrorKind::DumpFailed,
            SnapshotError::RestoreFailed(_) => ErrorKind::RestoreFailed,
            SnapshotError::ArtifactNotFound(_) => ErrorKind::ArtifactNotFound,
            SnapshotError::ArtifactCorrupt(_) => ErrorKind::ArtifactCorrupt,
            SnapshotError::StorageExhausted(_) => ErrorKind::StorageExhausted,
            SnapshotError::PartialMerge { .. } => ErrorKind::PartialMerge,
            SnapshotError::CompositeFailed(_) => ErrorKind::CompositeFailed,
            SnapshotError::Cancelled => ErrorKind::Cancelled,
            SnapshotError::ResourceBusy(_) => ErrorKind::ResourceBusy,
            SnapshotError::SnapshotNotFound(_) => ErrorKind::SnapshotNotFound,
            SnapshotError::Catalog(_) => ErrorKind::Catalog,
            SnapshotError::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Whether an I/O error means the target filesystem ran out of space
pub fn is_storage_full(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::StorageFull {
        return true;
    }

    // ENOSPC / ERROR_DISK_FULL, for platforms where the kind is not mapped
    #[cfg(unix)]
    let codes: &[i32] = &[28];
    #[cfg(windows)]
    let codes: &[i32] = &[39, 112];
    #[cfg(not(any(unix, windows)))]
    let codes: &[i32] = &[];

    err.raw_os_error().map_or(false, |code| codes.contains(&code))
}

fn summarize_components(components: &[ComponentOutcome]) -> String {
    components
        .iter()
        .map(|c| format!("{} ({})", c.name, c.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Success flag plus detail, the shape every public operation reports in
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> OperationResult<T> {
    pub fn from_result(result: Result<T, SnapshotError>, success_message: impl Into<String>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                kind: None,
                message: success_message.into(),
                data: Some(data),
            },
            Err(e) => Self {
                success: false,
                kind: Some(e.kind()),
                message: e.to_string(),
                data: None,
            },
        }
    }
}
