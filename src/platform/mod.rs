//! OS capability layer
//!
//! Every OS-specific decision (tool names, service control) lives behind
//! [`Platform`]. One implementation is picked at start-up by [`native`] and
//! injected into the manager; nothing downstream branches on the OS.

pub mod archive;
mod database;
mod unix;
mod windows;

pub use archive::ArchiveFormat;
pub use database::DatabaseTools;
pub use unix::UnixPlatform;
pub use windows::WindowsPlatform;

use crate::error::SnapshotError;
use crate::locator::DatabaseConnection;
use crate::utils::executor::{CommandExecutor, RealExecutor};
use crate::utils::fs::TreeSize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub trait Platform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Package every regular file under `root` into `artifact`
    fn package_tree(
        &self,
        root: &Path,
        artifact: &Path,
        format: ArchiveFormat,
        cancel: &CancellationToken,
    ) -> Result<TreeSize, SnapshotError>;

    /// Unpack `artifact` into the (existing) directory `dest`
    fn extract_tree(
        &self,
        artifact: &Path,
        dest: &Path,
        format: ArchiveFormat,
        cancel: &CancellationToken,
    ) -> Result<(), SnapshotError>;

    /// Dump `conn` into `artifact`; an empty dump is a failure
    fn dump_database(
        &self,
        conn: &DatabaseConnection,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SnapshotError>;

    /// Feed the dump at `artifact` to the load tool
    fn load_database(
        &self,
        conn: &DatabaseConnection,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SnapshotError>;

    /// Make a daemon pick up restored files
    fn reload_service(&self, service: &str, cancel: &CancellationToken) -> Result<(), SnapshotError>;
}

/// Platform of the running OS, driving real subprocesses
pub fn native(timeout: Option<Duration>) -> Arc<dyn Platform> {
    native_with_executor(Arc::new(RealExecutor::new()), timeout)
}

pub fn native_with_executor(executor: Arc<dyn CommandExecutor>, timeout: Option<Duration>) -> Arc<dyn Platform> {
    if cfg!(windows) {
        Arc::new(WindowsPlatform::new(executor, timeout))
    } else {
        Arc::new(UnixPlatform::new(executor, timeout))
    }
}

/// A platform for tests: real archives, recorded database and service calls
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum PlatformCall {
        Dump { target: String },
        Load { target: String, contents: String },
        Reload { service: String },
    }

    #[derive(Clone, Default)]
    pub struct MockPlatform {
        calls: Arc<Mutex<Vec<PlatformCall>>>,
        /// Contents written by `dump_database`
        dump_contents: Arc<Mutex<String>>,
        dump_error: Arc<Mutex<Option<String>>>,
        load_error: Arc<Mutex<Option<String>>>,
        reload_error: Arc<Mutex<Option<String>>>,
        /// Archive members `extract_tree` leaves out of the destination
        unextracted: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl MockPlatform {
        pub fn new() -> Self {
            let platform = Self::default();
            *platform.dump_contents.lock() = "-- dump\n".to_string();
            platform
        }

        pub fn with_dump_contents(self, contents: &str) -> Self {
            *self.dump_contents.lock() = contents.to_string();
            self
        }

        pub fn fail_dump(self, message: &str) -> Self {
            *self.dump_error.lock() = Some(message.to_string());
            self
        }

        pub fn fail_load(self, message: &str) -> Self {
            *self.load_error.lock() = Some(message.to_string());
            self
        }

        pub fn fail_reload(self, message: &str) -> Self {
            *self.reload_error.lock() = Some(message.to_string());
            self
        }

        /// Simulate an extractor that silently drops one member
        pub fn skip_on_extract(self, relative: &str) -> Self {
            self.unextracted.lock().push(PathBuf::from(relative));
            self
        }

        pub fn calls(&self) -> Vec<PlatformCall> {
            self.calls.lock().clone()
        }

        pub fn reloads(&self) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .filter_map(|c| match c {
                    PlatformCall::Reload { service } => Some(service.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl Platform for MockPlatform {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn package_tree(
            &self,
            root: &Path,
            artifact: &Path,
            format: ArchiveFormat,
            cancel: &CancellationToken,
        ) -> Result<TreeSize, SnapshotError> {
            archive::write_tree(root, artifact, format, cancel)
        }

        fn extract_tree(
            &self,
            artifact: &Path,
            dest: &Path,
            format: ArchiveFormat,
            cancel: &CancellationToken,
        ) -> Result<(), SnapshotError> {
            archive::extract(artifact, dest, format, cancel)?;
            for relative in self.unextracted.lock().iter() {
                let _ = std::fs::remove_file(dest.join(relative));
            }
            Ok(())
        }

        fn dump_database(
            &self,
            conn: &DatabaseConnection,
            artifact: &Path,
            cancel: &CancellationToken,
        ) -> Result<(), SnapshotError> {
            if cancel.is_cancelled() {
                return Err(SnapshotError::Cancelled);
            }
            self.calls.lock().push(PlatformCall::Dump {
                target: conn.target().to_string(),
            });
            if let Some(message) = self.dump_error.lock().clone() {
                return Err(SnapshotError::DumpFailed(message));
            }
            std::fs::write(artifact, self.dump_contents.lock().as_bytes())
                .map_err(|e| SnapshotError::io("Failed to write dump", e))
        }

        fn load_database(
            &self,
            conn: &DatabaseConnection,
            artifact: &Path,
            cancel: &CancellationToken,
        ) -> Result<(), SnapshotError> {
            if cancel.is_cancelled() {
                return Err(SnapshotError::Cancelled);
            }
            let contents = std::fs::read_to_string(artifact)
                .map_err(|_| SnapshotError::ArtifactNotFound(artifact.to_path_buf()))?;
            self.calls.lock().push(PlatformCall::Load {
                target: conn.target().to_string(),
                contents,
            });
            match self.load_error.lock().clone() {
                Some(message) => Err(SnapshotError::RestoreFailed(message)),
                None => Ok(()),
            }
        }

        fn reload_service(&self, service: &str, _cancel: &CancellationToken) -> Result<(), SnapshotError> {
            self.calls.lock().push(PlatformCall::Reload {
                service: service.to_string(),
            });
            match self.reload_error.lock().clone() {
                Some(message) => Err(SnapshotError::RestoreFailed(message)),
                None => Ok(()),
            }
        }
    }
}
