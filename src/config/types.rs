use crate::catalog::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub global: GlobalConfig,

    /// Per-kind overrides of `global.max_snapshots`
    #[serde(default)]
    pub retention: HashMap<String, usize>,

    /// Root path templates per kind; `{ref}` is replaced by the resource reference
    #[serde(default)]
    pub locations: HashMap<String, String>,

    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub full_system: Option<FullSystemConfig>,

    /// Service to reload after a restore, per kind; an empty name disables the hook
    #[serde(default)]
    pub reload: HashMap<String, String>,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Base directory of the backup store
    pub backup_root: PathBuf,

    /// Where restores stage extracted archives
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Where per-resource lock files live
    #[serde(default)]
    pub lock_directory: Option<PathBuf>,

    /// Catalog file (defaults to `<backup_root>/catalog.json`)
    #[serde(default)]
    pub catalog_file: Option<PathBuf>,

    /// Snapshots kept per resource
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,

    /// Deadline for external tools; 0 disables it
    #[serde(default = "default_timeout")]
    pub operation_timeout_seconds: u64,

    /// Logging configuration
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: u32,
    /// File log encoding: `text` or `json`
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Mysql,
    Postgres,
}

impl DatabaseEngine {
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseEngine::Mysql => 3306,
            DatabaseEngine::Postgres => 5432,
        }
    }
}

/// Connection used for database-shaped resources
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_engine")]
    pub engine: DatabaseEngine,

    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default = "default_db_user")]
    pub user: String,

    /// File holding the password; passed to the tools through the environment
    #[serde(default)]
    pub password_file: Option<PathBuf>,

    #[serde(default)]
    pub dump_program: Option<String>,

    #[serde(default)]
    pub load_program: Option<String>,
}

/// Sources composed by a fullSystem snapshot
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FullSystemConfig {
    pub files_root: PathBuf,
    pub config_root: PathBuf,
}

/// Notification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub discord_webhook_url: String,

    #[serde(default = "default_notify_on")]
    pub notify_on: Vec<NotifyEvent>,

    #[serde(default = "default_rate_limit")]
    pub rate_limit_minutes: u64,

    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            discord_webhook_url: String::new(),
            notify_on: default_notify_on(),
            rate_limit_minutes: default_rate_limit(),
            cache_file: default_cache_file(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotifyEvent {
    Failure,
    Warning,
    Success,
}

/// Count-based retention, uniform across kinds unless overridden
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_snapshots: usize,
    pub overrides: HashMap<ResourceKind, usize>,
}

impl RetentionPolicy {
    pub fn uniform(max_snapshots: usize) -> Self {
        Self {
            max_snapshots,
            overrides: HashMap::new(),
        }
    }

    pub fn max_for(&self, kind: ResourceKind) -> usize {
        self.overrides
            .get(&kind)
            .copied()
            .unwrap_or(self.max_snapshots)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::uniform(default_max_snapshots())
    }
}

/// Configuration after defaults, tilde expansion and kind parsing
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub backup_root: PathBuf,
    pub staging_dir: PathBuf,
    pub lock_directory: PathBuf,
    pub catalog_file: PathBuf,
    pub retention: RetentionPolicy,
    pub operation_timeout: Option<Duration>,
    pub locations: HashMap<ResourceKind, String>,
    pub reload_services: HashMap<ResourceKind, String>,
    pub database: Option<DatabaseConfig>,
    pub full_system: Option<FullSystemConfig>,
}

// Default value functions

fn default_max_snapshots() -> usize { 5 }
fn default_timeout() -> u64 { 3600 }
fn default_log_directory() -> PathBuf { PathBuf::from("~/logs") }
fn default_log_level() -> String { "info".to_string() }
fn default_log_max_files() -> u32 { 10 }
fn default_engine() -> DatabaseEngine { DatabaseEngine::Mysql }
fn default_db_host() -> String { "127.0.0.1".to_string() }
fn default_db_user() -> String { "root".to_string() }
fn default_notify_on() -> Vec<NotifyEvent> {
    vec![NotifyEvent::Failure, NotifyEvent::Warning]
}
fn default_rate_limit() -> u64 { 60 }
fn default_cache_file() -> PathBuf {
    PathBuf::from("~/.cache/panel-snapshots-notifications.json")
}

/// Root templates used when `[locations]` does not name a kind
pub fn default_locations() -> HashMap<ResourceKind, String> {
    [
        (ResourceKind::VirtualHost, "/var/www/{ref}"),
        (ResourceKind::MailAccount, "/var/mail/vhosts/{ref}"),
        (ResourceKind::FtpAccount, "/srv/ftp/{ref}"),
        (ResourceKind::SshAccount, "/home/{ref}"),
        (ResourceKind::TlsCertificate, "/etc/letsencrypt/live/{ref}"),
    ]
    .into_iter()
    .map(|(kind, template)| (kind, template.to_string()))
    .collect()
}

/// Daemons that must pick up restored files, per kind
pub fn default_reload_services() -> HashMap<ResourceKind, String> {
    [
        (ResourceKind::VirtualHost, "nginx"),
        (ResourceKind::TlsCertificate, "nginx"),
        (ResourceKind::DnsZone, "named"),
        (ResourceKind::MailAccount, "postfix"),
        (ResourceKind::FtpAccount, "vsftpd"),
        (ResourceKind::SshAccount, "sshd"),
        (ResourceKind::CronJob, "cron"),
    ]
    .into_iter()
    .map(|(kind, service)| (kind, service.to_string()))
    .collect()
}
