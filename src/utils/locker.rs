//! File-based locking to serialize operations on one resource

use super::fs::sanitize_component;
use crate::catalog::ResourceKind;
use crate::error::SnapshotError;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Exclusive lock on one (kind, ref) pair
///
/// Held for the whole of a backup, restore, delete or prune. Acquisition
/// never waits: a held lock yields `ResourceBusy`.
pub struct ResourceLock {
    // Declared before `_lock` so it drops first
    guard: Option<RwLockWriteGuard<'static, File>>,
    _lock: Box<RwLock<File>>,
    lock_path: PathBuf,
}

impl ResourceLock {
    /// Acquire the lock for a resource, or fail with `ResourceBusy`
    pub fn acquire(
        lock_dir: &Path,
        kind: ResourceKind,
        resource_ref: Option<&str>,
    ) -> Result<Self, SnapshotError> {
        let key = lock_key(kind, resource_ref);
        let lock_path = lock_dir.join(format!("panel-snapshots-{}.lock", key));

        debug!("Attempting to acquire lock: {:?}", lock_path);

        std::fs::create_dir_all(lock_dir)
            .map_err(|e| SnapshotError::io("Failed to create lock directory", e))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| SnapshotError::io(format!("Failed to open lock file {:?}", lock_path), e))?;

        let mut lock = Box::new(RwLock::new(file));

        // SAFETY: the guard borrows the RwLock stored behind `lock`. The box
        // gives it a stable address for as long as this struct lives, and the
        // guard is always dropped before the box (field order and `Drop`).
        let lock_ptr: *mut RwLock<File> = &mut *lock;
        let guard = match unsafe { (*lock_ptr).try_write() } {
            Ok(guard) => guard,
            Err(e) if is_contended(&e) => {
                return Err(SnapshotError::ResourceBusy(key));
            }
            Err(e) => {
                return Err(SnapshotError::io(format!("Failed to lock {:?}", lock_path), e));
            }
        };
        let guard: RwLockWriteGuard<'static, File> = unsafe { std::mem::transmute(guard) };

        info!("Acquired lock for {}", key);

        Ok(Self {
            guard: Some(guard),
            _lock: lock,
            lock_path,
        })
    }

    /// Get the lock file path (for cleanup or inspection)
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ResourceLock {
    fn drop(&mut self) {
        self.guard.take();
        // The lock file stays; unlinking it would let a waiter lock a stale inode
        debug!("Released lock {:?}", self.lock_path);
    }
}

fn is_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    // ERROR_LOCK_VIOLATION
    cfg!(windows) && err.raw_os_error() == Some(33)
}

/// File-name-safe key for a resource
pub fn lock_key(kind: ResourceKind, resource_ref: Option<&str>) -> String {
    match resource_ref {
        Some(r) => format!("{}-{}", kind, sanitize_component(r)),
        None => kind.to_string(),
    }
}
