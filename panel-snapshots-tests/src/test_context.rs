//! Scratch directories and the mocked snapshot harness

use crate::fixtures::{site_files, write_tree, DATABASE, SITE};
use panel_snapshots::catalog::{MemoryCatalog, ResourceKind};
use panel_snapshots::config::{DatabaseEngine, RetentionPolicy};
use panel_snapshots::locator::{DatabaseConnection, ResourceSource, StaticLocator};
use panel_snapshots::managers::notification::mock::RecordingNotifier;
use panel_snapshots::managers::snapshot::{ManagerSettings, SnapshotManager};
use panel_snapshots::platform::mock::MockPlatform;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Scratch directory for tests that need files but no manager
pub struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn create_subdir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create subdirectory");
        path
    }

    /// Write `content` to `name`, creating parent directories
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        write_tree(self.temp_dir.path(), &[(name, content)]);
        path
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A manager over an in-memory catalog, a mock platform and a recording notifier
///
/// The virtual host [`SITE`] lives under `<temp>/www` and is populated with
/// [`site_files`]; the database [`DATABASE`] is served by the mock platform.
pub struct SnapshotHarness {
    temp_dir: TempDir,
    pub platform: MockPlatform,
    pub notifier: RecordingNotifier,
    pub catalog: Arc<MemoryCatalog>,
    locator: StaticLocator,
    reload_services: HashMap<ResourceKind, String>,
}

impl SnapshotHarness {
    pub fn new() -> Self {
        Self::with_platform(MockPlatform::new())
    }

    pub fn with_platform(platform: MockPlatform) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let site = temp_dir.path().join("www").join(SITE);
        write_tree(&site, &site_files());

        let locator = StaticLocator::new()
            .with(ResourceKind::VirtualHost, Some(SITE), ResourceSource::Tree { root: site })
            .with(
                ResourceKind::Database,
                Some(DATABASE),
                ResourceSource::Database(DatabaseConnection::new(DatabaseEngine::Mysql, Some(DATABASE))),
            );

        let mut reload_services = HashMap::new();
        reload_services.insert(ResourceKind::VirtualHost, "nginx".to_string());

        Self {
            temp_dir,
            platform,
            notifier: RecordingNotifier::new(),
            catalog: Arc::new(MemoryCatalog::new()),
            locator,
            reload_services,
        }
    }

    /// Register another tree-shaped resource rooted under the temp dir
    pub fn add_tree(&mut self, kind: ResourceKind, resource_ref: &str, files: &[(&str, &str)]) -> PathBuf {
        let root = self.temp_dir.path().join(kind.as_str()).join(resource_ref);
        write_tree(&root, files);
        std::fs::create_dir_all(&root).expect("Failed to create resource root");
        self.locator
            .insert(kind, Some(resource_ref), ResourceSource::Tree { root: root.clone() });
        root
    }

    /// Register the fullSystem sources, optionally with a database
    pub fn add_full_system(&mut self, with_database: bool) -> (PathBuf, PathBuf) {
        let files_root = self.temp_dir.path().join("www");
        let config_root = self.temp_dir.path().join("etc");
        write_tree(&config_root, &[("panel.toml", "port = 8443")]);

        self.locator.insert(
            ResourceKind::FullSystem,
            None,
            ResourceSource::Composite {
                files_root: files_root.clone(),
                database: with_database.then(|| DatabaseConnection::new(DatabaseEngine::Mysql, None)),
                config_root: config_root.clone(),
            },
        );
        (files_root, config_root)
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn site(&self) -> PathBuf {
        self.temp_dir.path().join("www").join(SITE)
    }

    pub fn backup_root(&self) -> PathBuf {
        self.temp_dir.path().join("backups")
    }

    pub fn settings(&self, max_snapshots: usize) -> ManagerSettings {
        ManagerSettings::new(self.backup_root())
            .with_retention(RetentionPolicy::uniform(max_snapshots))
            .with_reload_services(self.reload_services.clone())
    }

    /// A manager with a uniform retention limit
    pub fn manager(&self, max_snapshots: usize) -> SnapshotManager {
        self.manager_with(self.settings(max_snapshots))
    }

    pub fn manager_with(&self, settings: ManagerSettings) -> SnapshotManager {
        SnapshotManager::new(
            settings,
            self.catalog.clone(),
            Arc::new(self.locator.clone()),
            Arc::new(self.platform.clone()),
        )
        .with_notifier(Arc::new(self.notifier.clone()))
    }
}

impl Default for SnapshotHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Assertions on operation results that print the error on failure
pub trait ResultAssertions<T> {
    fn assert_ok(self) -> T;

    fn assert_ok_msg(self, msg: &str) -> T;

    /// The error's debug rendering must contain `needle`
    fn assert_err_contains(self, needle: &str);
}

impl<T: std::fmt::Debug, E: std::fmt::Debug> ResultAssertions<T> for Result<T, E> {
    fn assert_ok(self) -> T {
        self.assert_ok_msg("Expected Ok")
    }

    fn assert_ok_msg(self, msg: &str) -> T {
        match self {
            Ok(v) => v,
            Err(e) => panic!("{}: {:?}", msg, e),
        }
    }

    fn assert_err_contains(self, needle: &str) {
        match self {
            Ok(v) => panic!("Expected Err containing '{}', got Ok: {:?}", needle, v),
            Err(e) => {
                let rendered = format!("{:?}", e);
                assert!(rendered.contains(needle), "'{}' not found in {}", needle, rendered);
            }
        }
    }
}
