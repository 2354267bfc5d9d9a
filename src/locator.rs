//! Resolution of a (kind, ref) pair to where its state lives

use crate::catalog::ResourceKind;
use crate::config::{render_location, DatabaseConfig, DatabaseEngine, FullSystemConfig, ResolvedSettings};
use crate::error::SnapshotError;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Connection parameters handed to the dump/load tools
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConnection {
    pub engine: DatabaseEngine,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// `None` targets every database on the server
    pub database: Option<String>,
    pub dump_program: Option<String>,
    pub load_program: Option<String>,
}

impl DatabaseConnection {
    pub fn new(engine: DatabaseEngine, database: Option<&str>) -> Self {
        Self {
            engine,
            host: "127.0.0.1".to_string(),
            port: engine.default_port(),
            user: "root".to_string(),
            password: None,
            database: database.map(str::to_string),
            dump_program: None,
            load_program: None,
        }
    }

    pub fn target(&self) -> &str {
        self.database.as_deref().unwrap_or("<all databases>")
    }
}

impl fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConnection")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .finish()
    }
}

/// Where a resource's state lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSource {
    /// Directory tree packaged as a whole
    Tree { root: PathBuf },
    /// Database reached through the dump/load tools
    Database(DatabaseConnection),
    /// fullSystem: files, every database, panel configuration
    Composite {
        files_root: PathBuf,
        database: Option<DatabaseConnection>,
        config_root: PathBuf,
    },
}

/// Owned by the domain services; maps resources to roots or connections
pub trait ResourceLocator: Send + Sync {
    fn locate(&self, kind: ResourceKind, resource_ref: Option<&str>) -> Result<ResourceSource, SnapshotError>;
}

/// Reject references that could escape a root template
pub fn validate_ref(kind: ResourceKind, resource_ref: Option<&str>) -> Result<(), SnapshotError> {
    match resource_ref {
        None if kind.is_system_wide() => Ok(()),
        None => Err(SnapshotError::ResourceNotFound(format!(
            "{} requires a resource reference",
            kind
        ))),
        Some(_) if kind.is_system_wide() => Err(SnapshotError::ResourceNotFound(format!(
            "{} does not take a resource reference",
            kind
        ))),
        Some(r) if r.is_empty() || r.contains('/') || r.contains('\\') || r.contains("..") => Err(
            SnapshotError::ResourceNotFound(format!("Invalid resource reference '{}'", r)),
        ),
        Some(_) => Ok(()),
    }
}

/// Locator driven by the `[locations]`, `[database]` and `[full_system]` tables
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    locations: HashMap<ResourceKind, String>,
    database: Option<DatabaseConfig>,
    full_system: Option<FullSystemConfig>,
}

impl ConfigLocator {
    pub fn new(
        locations: HashMap<ResourceKind, String>,
        database: Option<DatabaseConfig>,
        full_system: Option<FullSystemConfig>,
    ) -> Self {
        Self {
            locations,
            database,
            full_system,
        }
    }

    pub fn from_settings(settings: &ResolvedSettings) -> Self {
        Self::new(
            settings.locations.clone(),
            settings.database.clone(),
            settings.full_system.clone(),
        )
    }

    fn connection(&self, database: Option<&str>) -> Result<DatabaseConnection, SnapshotError> {
        let config = self.database.as_ref().ok_or_else(|| {
            SnapshotError::ResourceNotFound("No [database] connection configured".to_string())
        })?;

        let password = match config.password_file {
            Some(ref path) => Some(read_password(path)?),
            None => None,
        };

        Ok(DatabaseConnection {
            engine: config.engine,
            host: config.host.clone(),
            port: config.port.unwrap_or_else(|| config.engine.default_port()),
            user: config.user.clone(),
            password,
            database: database.map(str::to_string),
            dump_program: config.dump_program.clone(),
            load_program: config.load_program.clone(),
        })
    }
}

fn read_password(path: &Path) -> Result<String, SnapshotError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim_end_matches(['\r', '\n']).to_string())
        .map_err(|e| {
            SnapshotError::ResourceNotFound(format!(
                "Cannot read database password file {:?}: {}",
                path, e
            ))
        })
}

impl ResourceLocator for ConfigLocator {
    fn locate(&self, kind: ResourceKind, resource_ref: Option<&str>) -> Result<ResourceSource, SnapshotError> {
        validate_ref(kind, resource_ref)?;

        match kind {
            ResourceKind::Database => Ok(ResourceSource::Database(self.connection(resource_ref)?)),
            ResourceKind::FullSystem => {
                let full_system = self.full_system.as_ref().ok_or_else(|| {
                    SnapshotError::ResourceNotFound("No [full_system] roots configured".to_string())
                })?;
                Ok(ResourceSource::Composite {
                    files_root: full_system.files_root.clone(),
                    database: self.connection(None).ok(),
                    config_root: full_system.config_root.clone(),
                })
            }
            _ => {
                let template = self.locations.get(&kind).ok_or_else(|| {
                    SnapshotError::ResourceNotFound(format!("No location configured for {}", kind))
                })?;
                Ok(ResourceSource::Tree {
                    root: render_location(template, resource_ref),
                })
            }
        }
    }
}

/// Fixed map from resource to source
#[derive(Debug, Clone, Default)]
pub struct StaticLocator {
    sources: HashMap<(ResourceKind, Option<String>), ResourceSource>,
}

impl StaticLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ResourceKind, resource_ref: Option<&str>, source: ResourceSource) -> Self {
        self.insert(kind, resource_ref, source);
        self
    }

    pub fn insert(&mut self, kind: ResourceKind, resource_ref: Option<&str>, source: ResourceSource) {
        self.sources
            .insert((kind, resource_ref.map(str::to_string)), source);
    }
}

impl ResourceLocator for StaticLocator {
    fn locate(&self, kind: ResourceKind, resource_ref: Option<&str>) -> Result<ResourceSource, SnapshotError> {
        validate_ref(kind, resource_ref)?;
        self.sources
            .get(&(kind, resource_ref.map(str::to_string)))
            .cloned()
            .ok_or_else(|| {
                SnapshotError::ResourceNotFound(crate::catalog::resource_label(kind, resource_ref))
            })
    }
}
