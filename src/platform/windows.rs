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

/// Windows hosts: `.exe` tools and the service control manager
pub struct WindowsPlatform {
    executor: Arc<dyn CommandExecutor>,
    timeout: Option<Duration>,
    tools: DatabaseTools,
}

impl WindowsPlatform {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Option<Duration>) -> Self {
        Self {
            executor,
            timeout,
            tools: DatabaseTools::WINDOWS,
        }
    }

    fn net(&self, verb: &str, service: &str, cancel: &CancellationToken) -> Result<(), SnapshotError> {
        let spec = CommandSpec::new("net.exe")
            .args([verb, service])
            .timeout(self.timeout);

        let output = self
            .executor
            .run(&spec, cancel)
            .map_err(|e| command_failure(e, SnapshotError::RestoreFailed))?;

        if !output.success {
            return Err(SnapshotError::RestoreFailed(format!(
                "net {} {} failed: {}",
                verb,
                service,
                output.stderr.trim()
            )));
        }

        Ok(())
    }
}

impl Platform for WindowsPlatform {
    fn name(&self) -> &'static str {
        "windows"
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

    /// Services have no reload verb; stop then start
    fn reload_service(&self, service: &str, cancel: &CancellationToken) -> Result<(), SnapshotError> {
        info!("Restarting service {}", service);
        self.net("stop", service, cancel)?;
        self.net("start", service, cancel)
    }
}
