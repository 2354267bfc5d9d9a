use super::expand_tilde;
use super::types::*;
use crate::catalog::ResourceKind;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown resource kind '{key}' in [{section}]")]
    UnknownResourceKind { section: String, key: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate the configuration
fn validate_config(config: &Config) -> Result<()> {
    let backup_root = expand_tilde(&config.global.backup_root);
    if !backup_root.is_absolute() {
        return Err(ConfigError::ValidationError(format!(
            "backup_root must be an absolute path: {:?}",
            config.global.backup_root
        )));
    }

    if config.global.max_snapshots == 0 {
        return Err(ConfigError::ValidationError(
            "max_snapshots must be at least 1".to_string(),
        ));
    }

    for (kind, max) in parse_kind_map("retention", &config.retention)? {
        if max == 0 {
            return Err(ConfigError::ValidationError(format!(
                "retention for '{}' must be at least 1",
                kind
            )));
        }
    }

    for (kind, template) in parse_kind_map("locations", &config.locations)? {
        if !expand_tilde(Path::new(&template)).is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "location for '{}' must be an absolute path: {}",
                kind, template
            )));
        }
    }

    parse_kind_map("reload", &config.reload)?;

    if let Some(ref database) = config.database {
        if database.port == Some(0) {
            return Err(ConfigError::ValidationError(
                "database port must be non-zero".to_string(),
            ));
        }
    }

    Ok(())
}

/// Parse the string keys of a per-kind table
fn parse_kind_map<V: Clone>(section: &str, raw: &HashMap<String, V>) -> Result<HashMap<ResourceKind, V>> {
    let mut parsed = HashMap::new();

    for (key, value) in raw {
        let kind: ResourceKind = key.parse().map_err(|_| ConfigError::UnknownResourceKind {
            section: section.to_string(),
            key: key.clone(),
        })?;
        parsed.insert(kind, value.clone());
    }

    Ok(parsed)
}

/// Resolve defaults, overrides and paths into the settings the manager runs with
pub fn resolve_settings(config: &Config) -> Result<ResolvedSettings> {
    let global = &config.global;
    let backup_root = expand_tilde(&global.backup_root);

    let staging_dir = global
        .staging_dir
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(|| std::env::temp_dir().join("panel-snapshots-staging"));

    let lock_directory = global
        .lock_directory
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(std::env::temp_dir);

    let catalog_file = catalog_path(config);

    // Resolve retention (kind override > global)
    let retention = RetentionPolicy {
        max_snapshots: global.max_snapshots,
        overrides: parse_kind_map("retention", &config.retention)?,
    };

    let operation_timeout = match global.operation_timeout_seconds {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    let mut locations = default_locations();
    locations.extend(parse_kind_map("locations", &config.locations)?);

    // Resolve reload hooks (config > defaults, empty disables)
    let mut reload_services = default_reload_services();
    for (kind, service) in parse_kind_map("reload", &config.reload)? {
        if service.trim().is_empty() {
            reload_services.remove(&kind);
        } else {
            reload_services.insert(kind, service);
        }
    }

    let database = config.database.clone().map(|mut db| {
        db.password_file = db.password_file.as_deref().map(expand_tilde);
        db
    });

    let full_system = config.full_system.clone().map(|fs| FullSystemConfig {
        files_root: expand_tilde(&fs.files_root),
        config_root: expand_tilde(&fs.config_root),
    });

    Ok(ResolvedSettings {
        backup_root,
        staging_dir,
        lock_directory,
        catalog_file,
        retention,
        operation_timeout,
        locations,
        reload_services,
        database,
        full_system,
    })
}

/// Explicit `catalog_file`, else `catalog.json` under the backup root
pub fn catalog_path(config: &Config) -> PathBuf {
    config
        .global
        .catalog_file
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(|| expand_tilde(&config.global.backup_root).join("catalog.json"))
}
