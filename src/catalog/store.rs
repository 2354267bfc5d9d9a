use super::{CatalogError, NewSnapshot, Snapshot, SnapshotCatalog, SnapshotStatus};
use crate::utils::fs::with_suffix;
use fd_lock::RwLock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogState {
    /// Last id handed out; ids are never reused
    next_id: u64,
    snapshots: BTreeMap<u64, Snapshot>,
}

impl CatalogState {
    fn insert(&mut self, new: NewSnapshot) -> Snapshot {
        self.next_id += 1;
        let snapshot = Snapshot {
            id: self.next_id,
            resource_kind: new.resource_kind,
            resource_ref: new.resource_ref,
            artifact_path: new.artifact_path,
            size_bytes: 0,
            status: SnapshotStatus::Pending,
            created_at: new.created_at,
            completed_at: None,
            components: Vec::new(),
            error: None,
        };
        self.snapshots.insert(snapshot.id, snapshot.clone());
        snapshot
    }

    fn update(&mut self, snapshot: &Snapshot) -> Result<(), CatalogError> {
        match self.snapshots.get_mut(&snapshot.id) {
            Some(existing) => {
                *existing = snapshot.clone();
                Ok(())
            }
            None => Err(CatalogError::MissingRecord(snapshot.id)),
        }
    }
}

/// Catalog held in process memory only
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotCatalog for MemoryCatalog {
    fn insert(&self, new: NewSnapshot) -> Result<Snapshot, CatalogError> {
        Ok(self.state.lock().insert(new))
    }

    fn update(&self, snapshot: &Snapshot) -> Result<(), CatalogError> {
        self.state.lock().update(snapshot)
    }

    fn get(&self, id: u64) -> Result<Option<Snapshot>, CatalogError> {
        Ok(self.state.lock().snapshots.get(&id).cloned())
    }

    fn delete(&self, id: u64) -> Result<bool, CatalogError> {
        Ok(self.state.lock().snapshots.remove(&id).is_some())
    }

    fn list_all(&self) -> Result<Vec<Snapshot>, CatalogError> {
        Ok(self.state.lock().snapshots.values().cloned().collect())
    }
}

/// Catalog persisted as a single JSON document shared between processes
///
/// Nothing is cached: every call re-reads the file. Mutations hold an
/// exclusive lock on the sibling `.lock` file across read, change and write,
/// and the new document is written to a unique temp file that is renamed
/// over the catalog.
#[derive(Debug)]
pub struct JsonCatalog {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonCatalog {
    /// Open the catalog at `path`, starting empty if the file does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        let catalog = Self {
            lock_path: with_suffix(&path, ".lock"),
            path,
        };

        let state = catalog.load()?;
        debug!(
            "Opened snapshot catalog {:?} ({} records)",
            catalog.path,
            state.snapshots.len()
        );

        Ok(catalog)
    }

    fn io_err(&self, source: io::Error) -> CatalogError {
        CatalogError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn load(&self) -> Result<CatalogState, CatalogError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CatalogState::default()),
            Err(e) => return Err(self.io_err(e)),
        };

        serde_json::from_str(&content).map_err(|source| CatalogError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn lock_file(&self) -> Result<RwLock<File>, CatalogError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| self.io_err(e))?;
        Ok(RwLock::new(file))
    }

    fn persist(&self, state: &CatalogState) -> Result<(), CatalogError> {
        let content = serde_json::to_vec_pretty(state).map_err(|source| CatalogError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.io_err(e))?;
        tmp.write_all(&content).map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        Ok(())
    }

    /// Read the current document under a shared lock
    fn read<T>(&self, view: impl FnOnce(CatalogState) -> T) -> Result<T, CatalogError> {
        if !self.path.exists() {
            return Ok(view(CatalogState::default()));
        }

        let lock = self.lock_file()?;
        let _guard = lock.read().map_err(|e| self.io_err(e))?;
        Ok(view(self.load()?))
    }

    /// Re-read, change and write the document under an exclusive lock
    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut CatalogState) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut lock = self.lock_file()?;
        let _guard = lock.write().map_err(|e| self.io_err(e))?;

        let mut state = self.load()?;
        let value = apply(&mut state)?;
        self.persist(&state)?;
        Ok(value)
    }
}

impl SnapshotCatalog for JsonCatalog {
    fn insert(&self, new: NewSnapshot) -> Result<Snapshot, CatalogError> {
        self.mutate(|state| Ok(state.insert(new)))
    }

    fn update(&self, snapshot: &Snapshot) -> Result<(), CatalogError> {
        self.mutate(|state| state.update(snapshot))
    }

    fn get(&self, id: u64) -> Result<Option<Snapshot>, CatalogError> {
        self.read(|mut state| state.snapshots.remove(&id))
    }

    fn delete(&self, id: u64) -> Result<bool, CatalogError> {
        self.mutate(|state| Ok(state.snapshots.remove(&id).is_some()))
    }

    fn list_all(&self) -> Result<Vec<Snapshot>, CatalogError> {
        self.read(|state| state.snapshots.into_values().collect())
    }
}
