use crate::error::{ErrorKind, SnapshotError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Every resource type with a backup/restore lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Database,
    VirtualHost,
    DnsZone,
    MailAccount,
    FtpAccount,
    SshAccount,
    TlsCertificate,
    CronJob,
    LogSet,
    NotificationSet,
    SettingsSet,
    FullSystem,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 12] = [
        ResourceKind::Database,
        ResourceKind::VirtualHost,
        ResourceKind::DnsZone,
        ResourceKind::MailAccount,
        ResourceKind::FtpAccount,
        ResourceKind::SshAccount,
        ResourceKind::TlsCertificate,
        ResourceKind::CronJob,
        ResourceKind::LogSet,
        ResourceKind::NotificationSet,
        ResourceKind::SettingsSet,
        ResourceKind::FullSystem,
    ];

    /// Name used in artifact paths, config keys and CLI arguments
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Database => "database",
            ResourceKind::VirtualHost => "virtualHost",
            ResourceKind::DnsZone => "dnsZone",
            ResourceKind::MailAccount => "mailAccount",
            ResourceKind::FtpAccount => "ftpAccount",
            ResourceKind::SshAccount => "sshAccount",
            ResourceKind::TlsCertificate => "tlsCertificate",
            ResourceKind::CronJob => "cronJob",
            ResourceKind::LogSet => "logSet",
            ResourceKind::NotificationSet => "notificationSet",
            ResourceKind::SettingsSet => "settingsSet",
            ResourceKind::FullSystem => "fullSystem",
        }
    }

    /// System-wide kinds never carry a resource reference
    pub fn is_system_wide(&self) -> bool {
        matches!(self, ResourceKind::FullSystem)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown resource kind: {0}")]
pub struct UnknownResourceKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownResourceKind;

    /// Accepts `virtualHost`, `virtual-host`, `virtual_host` and any casing
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();

        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().to_lowercase() == wanted)
            .ok_or_else(|| UnknownResourceKind(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SnapshotStatus::Pending => "pending",
            SnapshotStatus::Completed => "completed",
            SnapshotStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One catalog record per backup artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: u64,
    pub resource_kind: ResourceKind,
    pub resource_ref: Option<String>,
    pub artifact_path: PathBuf,
    pub size_bytes: u64,
    pub status: SnapshotStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Sub-operation outcomes of a composite (fullSystem) snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentOutcome>,

    /// Failure detail when `status = failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What callers receive from create/list operations
pub type SnapshotDescriptor = Snapshot;

impl Snapshot {
    pub fn belongs_to(&self, kind: ResourceKind, resource_ref: Option<&str>) -> bool {
        self.resource_kind == kind && self.resource_ref.as_deref() == resource_ref
    }

    /// `kind/ref`, or just `kind` for system-wide snapshots
    pub fn resource_label(&self) -> String {
        resource_label(self.resource_kind, self.resource_ref.as_deref())
    }
}

pub fn resource_label(kind: ResourceKind, resource_ref: Option<&str>) -> String {
    match resource_ref {
        Some(r) => format!("{}/{}", kind, r),
        None => kind.to_string(),
    }
}

/// Data needed to open a new pending record
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub resource_kind: ResourceKind,
    pub resource_ref: Option<String>,
    pub artifact_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Per-kind aggregate computed from catalog records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub count: usize,
    pub total_bytes: u64,
    pub last_snapshot: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Outcome of one sub-operation of a composite snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentOutcome {
    pub name: String,
    pub status: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub message: String,
    #[serde(default)]
    pub size_bytes: u64,
}

impl ComponentOutcome {
    pub fn succeeded(name: &str, size_bytes: u64) -> Self {
        Self {
            name: name.to_string(),
            status: ComponentStatus::Succeeded,
            kind: None,
            message: "ok".to_string(),
            size_bytes,
        }
    }

    pub fn failed(name: &str, error: &SnapshotError) -> Self {
        Self {
            name: name.to_string(),
            status: ComponentStatus::Failed,
            kind: Some(error.kind()),
            message: error.to_string(),
            size_bytes: 0,
        }
    }

    pub fn skipped(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ComponentStatus::Skipped,
            kind: None,
            message: reason.to_string(),
            size_bytes: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ComponentStatus::Succeeded
    }
}
