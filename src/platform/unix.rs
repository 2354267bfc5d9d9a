use super::database::{check_dump, check_load, command_failure};
use super::{archive, ArchiveFormat, DatabaseTools, Platform};
use crate::error::SnapshotError;
use crate::locator::DatabaseConnection;
use crate::utils::command::CommandSpec;
use crate::utils::executor::CommandExecutor;
use crate::utils::fs::TreeSize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Linux/BSD hosts: PATH tools and systemd service control
pub struct UnixPlatform {
    executor: Arc<dyn CommandExecutor>,
    timeout: Option<Duration>,
    tools: DatabaseTools,
}

impl UnixPlatform {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Option<Duration>) -> Self {
        Self {
            executor,
            timeout,
            tools: DatabaseTools::UNIX,
        }
    }
}

impl Platform for UnixPlatform {
    fn name(&self) -> &'static str {
        "unix"
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
        archive::extract(artifact, dest, format, cancel)
    }

    fn dump_database(
        &self,
        conn: &DatabaseConnection,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SnapshotError> {
        let spec = self.tools.dump_spec(conn, artifact, self.timeout);
        info!("Dumping database {} with {}", conn.target(), spec.program);
        check_dump(self.executor.run(&spec, cancel), conn, artifact)
    }

    fn load_database(
        &self,
        conn: &DatabaseConnection,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SnapshotError> {
        let spec = self.tools.load_spec(conn, artifact, self.timeout);
        info!("Loading database {} with {}", conn.target(), spec.program);
        check_load(self.executor.run(&spec, cancel), conn)
    }

    fn reload_service(&self, service: &str, cancel: &CancellationToken) -> Result<(), SnapshotError> {
        let spec = CommandSpec::new("systemctl")
            .args(["reload", service])
            .timeout(self.timeout);

        info!("Reloading service {}", service);
        let output = self
            .executor
            .run(&spec, cancel)
            .map_err(|e| command_failure(e, SnapshotError::RestoreFailed))?;

        if !output.success {
            return Err(SnapshotError::RestoreFailed(format!(
                "systemctl reload {} failed: {}",
                service,
                output.stderr.trim()
            )));
        }

        Ok(())
    }
}
