//! Fluent API for building test configurations
//!
//! Provides a builder pattern for creating test configurations with sensible defaults.

use panel_snapshots::catalog::ResourceKind;
use panel_snapshots::config::{
    Config, DatabaseConfig, DatabaseEngine, FullSystemConfig, GlobalConfig, LogFormat,
    NotificationConfig,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builder for creating test configurations
pub struct ConfigBuilder {
    temp_dir: TempDir,
    global: GlobalConfig,
    retention: HashMap<String, usize>,
    locations: HashMap<String, String>,
    database: Option<DatabaseConfig>,
    full_system: Option<FullSystemConfig>,
    reload: HashMap<String, String>,
    notifications: NotificationConfig,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder with every path inside a fresh temp dir
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let backup_root = temp_dir.path().join("backups");
        fs::create_dir_all(&backup_root).expect("Failed to create backup root");

        // Create log directory
        let log_directory = temp_dir.path().join("logs");
        fs::create_dir_all(&log_directory).expect("Failed to create log_directory");

        let global = GlobalConfig {
            backup_root,
            staging_dir: Some(temp_dir.path().join("staging")),
            lock_directory: Some(temp_dir.path().join("locks")),
            catalog_file: None,
            max_snapshots: 5,
            operation_timeout_seconds: 60,
            log_directory,
            log_level: "info".to_string(),
            log_max_files: 5,
            log_format: LogFormat::Text,
        };

        let notifications = NotificationConfig {
            cache_file: temp_dir.path().join("notification-cache.json"),
            ..NotificationConfig::default()
        };

        Self {
            temp_dir,
            global,
            retention: HashMap::new(),
            locations: HashMap::new(),
            database: None,
            full_system: None,
            reload: HashMap::new(),
            notifications,
        }
    }

    /// Create a config whose virtual hosts live under `<temp>/www/{ref}`
    pub fn minimal() -> Self {
        let builder = Self::new();
        let www = builder.temp_dir.path().join("www");
        fs::create_dir_all(&www).expect("Failed to create www dir");

        let template = format!("{}/{{ref}}", www.display());
        builder.add_location(ResourceKind::VirtualHost, &template)
    }

    /// Set the default retention limit
    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.global.max_snapshots = max;
        self
    }

    /// Override the retention limit of one kind
    pub fn with_retention(mut self, kind: ResourceKind, max: usize) -> Self {
        self.retention.insert(kind.as_str().to_string(), max);
        self
    }

    /// Set the external tool deadline (0 disables it)
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.global.operation_timeout_seconds = seconds;
        self
    }

    /// Set the backup root
    pub fn with_backup_root(mut self, path: &Path) -> Self {
        self.global.backup_root = path.to_path_buf();
        self
    }

    /// Set the log directory
    pub fn with_log_dir(mut self, path: &Path) -> Self {
        self.global.log_directory = path.to_path_buf();
        self
    }

    /// Add a root template for a kind
    pub fn add_location(mut self, kind: ResourceKind, template: &str) -> Self {
        self.locations
            .insert(kind.as_str().to_string(), template.to_string());
        self
    }

    /// Add a database connection
    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.database = Some(database);
        self
    }

    /// Add a MySQL connection on localhost with default settings
    pub fn with_local_mysql(self) -> Self {
        self.with_database(DatabaseConfig {
            engine: DatabaseEngine::Mysql,
            host: "127.0.0.1".to_string(),
            port: None,
            user: "root".to_string(),
            password_file: None,
            dump_program: None,
            load_program: None,
        })
    }

    /// Configure fullSystem roots under the temp dir
    pub fn with_full_system(mut self) -> Self {
        let files_root = self.temp_dir.path().join("www");
        let config_root = self.temp_dir.path().join("etc");
        fs::create_dir_all(&files_root).expect("Failed to create files root");
        fs::create_dir_all(&config_root).expect("Failed to create config root");

        self.full_system = Some(FullSystemConfig {
            files_root,
            config_root,
        });
        self
    }

    /// Set or disable (empty name) the reload hook of a kind
    pub fn with_reload(mut self, kind: ResourceKind, service: &str) -> Self {
        self.reload
            .insert(kind.as_str().to_string(), service.to_string());
        self
    }

    /// Set notification configuration
    pub fn with_notifications(mut self, config: NotificationConfig) -> Self {
        self.notifications = config;
        self
    }

    /// Get the temp directory path
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Get the backup root
    pub fn backup_root(&self) -> &Path {
        &self.global.backup_root
    }

    /// Directory holding the virtual host `name`
    pub fn site_path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join("www").join(name)
    }

    /// Build the Config
    pub fn build(self) -> Config {
        self.persist().0
    }

    /// Keep the temp directory (don't delete on drop)
    pub fn persist(self) -> (Config, TempDir) {
        let config = Config {
            global: self.global,
            retention: self.retention,
            locations: self.locations,
            database: self.database,
            full_system: self.full_system,
            reload: self.reload,
            notifications: self.notifications,
        };
        (config, self.temp_dir)
    }

    /// Write the config as TOML next to its data and return the file path
    pub fn write(self) -> (PathBuf, Config, TempDir) {
        let (config, temp_dir) = self.persist();
        let path = temp_dir.path().join("config.toml");
        let toml_str = toml::to_string_pretty(&config).expect("Failed to serialize config");
        fs::write(&path, toml_str).expect("Failed to write config");
        (path, config, temp_dir)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
