//! Database strategy: dump to a `.sql` artifact, load it back on restore

use super::{BuildOutput, MergeOutcome, SnapshotStrategy};
use crate::error::SnapshotError;
use crate::locator::{DatabaseConnection, ResourceSource};
use crate::platform::Platform;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct DatabaseStrategy {
    platform: Arc<dyn Platform>,
}

impl DatabaseStrategy {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    fn connection<'a>(&self, source: &'a ResourceSource) -> Result<&'a DatabaseConnection, SnapshotError> {
        match source {
            ResourceSource::Database(conn) => Ok(conn),
            other => Err(SnapshotError::ResourceNotFound(format!(
                "Expected a database connection, got {:?}",
                other
            ))),
        }
    }
}

impl SnapshotStrategy for DatabaseStrategy {
    fn name(&self) -> &'static str {
        "database"
    }

    fn extension(&self) -> &'static str {
        "sql"
    }

    fn build(
        &self,
        source: &ResourceSource,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<BuildOutput, SnapshotError> {
        let conn = self.connection(source)?;
        self.platform.dump_database(conn, artifact, cancel)?;
        Ok(BuildOutput::default())
    }

    /// Objects in the dump overwrite their live counterparts; others are untouched
    fn restore(
        &self,
        source: &ResourceSource,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> Result<MergeOutcome, SnapshotError> {
        let conn = self.connection(source)?;

        if !artifact.is_file() {
            return Err(SnapshotError::ArtifactNotFound(artifact.to_path_buf()));
        }

        self.platform.load_database(conn, artifact, cancel)?;
        info!("Loaded {:?} into {}", artifact, conn.target());
        Ok(MergeOutcome::default())
    }
}
