//! Snapshot event notifications
//!
//! The manager reports every backup, restore and prune outcome to an
//! injected [`Notifier`]. [`NoopNotifier`] is the default; [`DiscordNotifier`]
//! posts rate-limited webhooks.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::{resource_label, ResourceKind};
use crate::config::{expand_tilde, NotificationConfig, NotifyEvent};

/// Something the subsystem did that a caller may want to hear about
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    BackupCompleted {
        kind: ResourceKind,
        resource_ref: Option<String>,
        snapshot_id: u64,
        size_bytes: u64,
        duration_secs: u64,
    },
    BackupFailed {
        kind: ResourceKind,
        resource_ref: Option<String>,
        error: String,
        duration_secs: u64,
    },
    RestoreCompleted {
        kind: ResourceKind,
        resource_ref: Option<String>,
        snapshot_id: u64,
        restored: usize,
        skipped: usize,
        failed: usize,
        /// A file or component failed
        partial: bool,
    },
    RestoreFailed {
        kind: ResourceKind,
        resource_ref: Option<String>,
        snapshot_id: u64,
        error: String,
    },
    PruneFailed {
        kind: ResourceKind,
        resource_ref: Option<String>,
        failures: usize,
        detail: String,
    },
}

impl SnapshotEvent {
    /// Severity used for filtering and colouring
    pub fn severity(&self) -> NotifyEvent {
        match self {
            SnapshotEvent::BackupCompleted { .. } => NotifyEvent::Success,
            SnapshotEvent::RestoreCompleted { partial: true, .. } => NotifyEvent::Warning,
            SnapshotEvent::RestoreCompleted { .. } => NotifyEvent::Success,
            SnapshotEvent::PruneFailed { .. } => NotifyEvent::Warning,
            SnapshotEvent::BackupFailed { .. } | SnapshotEvent::RestoreFailed { .. } => NotifyEvent::Failure,
        }
    }

    pub fn resource(&self) -> String {
        let (kind, resource_ref) = match self {
            SnapshotEvent::BackupCompleted { kind, resource_ref, .. }
            | SnapshotEvent::BackupFailed { kind, resource_ref, .. }
            | SnapshotEvent::RestoreCompleted { kind, resource_ref, .. }
            | SnapshotEvent::RestoreFailed { kind, resource_ref, .. }
            | SnapshotEvent::PruneFailed { kind, resource_ref, .. } => (*kind, resource_ref),
        };
        resource_label(kind, resource_ref.as_deref())
    }
}

/// Receiver of snapshot events; delivery failures are the notifier's to log
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &SnapshotEvent);
}

/// Drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, event: &SnapshotEvent) {
        debug!("No notifier configured, dropping {:?}", event.severity());
    }
}

impl SnapshotEvent {
    fn snapshot_id(&self) -> Option<u64> {
        match self {
            SnapshotEvent::BackupCompleted { snapshot_id, .. }
            | SnapshotEvent::RestoreCompleted { snapshot_id, .. }
            | SnapshotEvent::RestoreFailed { snapshot_id, .. } => Some(*snapshot_id),
            SnapshotEvent::BackupFailed { .. } | SnapshotEvent::PruneFailed { .. } => None,
        }
    }

    /// One-line human summary
    pub fn headline(&self) -> String {
        let resource = self.resource();
        match self {
            SnapshotEvent::BackupCompleted { size_bytes, .. } => {
                format!("Snapshot of '{}' completed ({} bytes)", resource, size_bytes)
            }
            SnapshotEvent::BackupFailed { .. } => format!("Snapshot of '{}' failed", resource),
            SnapshotEvent::RestoreCompleted {
                restored,
                skipped,
                failed,
                ..
            } => format!(
                "Restore of '{}': {} restored, {} skipped, {} failed",
                resource, restored, skipped, failed
            ),
            SnapshotEvent::RestoreFailed { .. } => format!("Restore of '{}' failed", resource),
            SnapshotEvent::PruneFailed { failures, .. } => format!(
                "Retention could not remove {} snapshot(s) of '{}'",
                failures, resource
            ),
        }
    }

    fn detail(&self) -> Option<&str> {
        match self {
            SnapshotEvent::BackupFailed { error, .. } | SnapshotEvent::RestoreFailed { error, .. } => {
                Some(error.as_str())
            }
            SnapshotEvent::PruneFailed { detail, .. } => Some(detail.as_str()),
            _ => None,
        }
    }

    fn duration_secs(&self) -> Option<u64> {
        match self {
            SnapshotEvent::BackupCompleted { duration_secs, .. }
            | SnapshotEvent::BackupFailed { duration_secs, .. } => Some(*duration_secs),
            _ => None,
        }
    }
}

const MAX_DETAIL_CHARS: usize = 500;

/// Discord embed for one event
fn discord_payload(event: &SnapshotEvent, now: DateTime<Utc>) -> Value {
    let severity = event.severity();
    let (color, icon) = match severity {
        NotifyEvent::Failure => (0xE74C3C, "\u{274C}"),
        NotifyEvent::Warning => (0xE67E22, "\u{26A0}\u{FE0F}"),
        NotifyEvent::Success => (0x2ECC71, "\u{2705}"),
    };

    let mut fields = vec![json!({ "name": "Resource", "value": event.resource(), "inline": true })];
    if let Some(id) = event.snapshot_id() {
        fields.push(json!({ "name": "Snapshot", "value": id.to_string(), "inline": true }));
    }
    if let Some(secs) = event.duration_secs() {
        fields.push(json!({ "name": "Duration", "value": format_elapsed(secs), "inline": true }));
    }
    if let Some(detail) = event.detail() {
        let mut shown: String = detail.chars().take(MAX_DETAIL_CHARS).collect();
        if shown.len() < detail.len() {
            shown.push_str("...");
        }
        fields.push(json!({ "name": "Error", "value": format!("```\n{}\n```", shown), "inline": false }));
    }

    json!({
        "username": "Panel Snapshots",
        "embeds": [{
            "title": format!("{} Panel Snapshots: {:?}", icon, severity),
            "description": event.headline(),
            "color": color,
            "fields": fields,
            "footer": { "text": "panel-snapshots" },
            "timestamp": now.to_rfc3339_opts(SecondsFormat::Secs, true),
        }]
    })
}

/// `1h 2m`, `2m 5s`, `45s`
fn format_elapsed(secs: u64) -> String {
    let parts = [(secs / 3600, "h"), ((secs % 3600) / 60, "m"), (secs % 60, "s")];
    let shown: Vec<String> = parts
        .iter()
        .skip_while(|(n, _)| *n == 0)
        .take(2)
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{}{}", n, unit))
        .collect();

    if shown.is_empty() {
        "0s".to_string()
    } else {
        shown.join(" ")
    }
}

/// Last send time per `resource:severity`, persisted as JSON between runs
struct RateLimiter {
    path: PathBuf,
    window: chrono::Duration,
}

impl RateLimiter {
    fn load(&self) -> Result<BTreeMap<String, DateTime<Utc>>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse notification cache {:?}", self.path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read notification cache {:?}", self.path)),
        }
    }

    fn is_limited(&self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .load()?
            .get(key)
            .is_some_and(|last| now.signed_duration_since(*last) < self.window))
    }

    /// Remember a send; entries older than a day are dropped
    fn record(&self, key: &str, now: DateTime<Utc>) -> Result<()> {
        let mut sent = self.load()?;
        sent.insert(key.to_string(), now);
        sent.retain(|_, last| now.signed_duration_since(*last) < chrono::Duration::days(1));

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&sent)?)
            .with_context(|| format!("Failed to write notification cache {:?}", self.path))
    }
}

/// Notifier posting to a Discord webhook, at most once per resource and
/// severity within the configured window
pub struct DiscordNotifier {
    webhook_url: String,
    notify_on: Vec<NotifyEvent>,
    limiter: RateLimiter,
}

impl DiscordNotifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            limiter: RateLimiter {
                path: expand_tilde(&config.cache_file),
                window: chrono::Duration::minutes(config.rate_limit_minutes as i64),
            },
            webhook_url: config.discord_webhook_url,
            notify_on: config.notify_on,
        }
    }

    pub fn is_enabled(&self, severity: NotifyEvent) -> bool {
        !self.webhook_url.is_empty() && self.notify_on.contains(&severity)
    }

    /// Post `event` unless its severity is filtered out or rate-limited
    pub fn send(&self, event: &SnapshotEvent) -> Result<()> {
        let severity = event.severity();
        if !self.is_enabled(severity) {
            debug!("{:?} notifications disabled, skipping", severity);
            return Ok(());
        }

        let key = format!("{}:{:?}", event.resource(), severity);
        let now = Utc::now();
        if self.limiter.is_limited(&key, now)? {
            debug!("Notification for {} rate-limited", key);
            return Ok(());
        }

        self.post(&discord_payload(event, now))?;
        self.limiter.record(&key, now)?;
        info!("Sent {:?} notification for '{}'", severity, event.resource());
        Ok(())
    }

    fn post(&self, payload: &Value) -> Result<()> {
        let response = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?
            .post(&self.webhook_url)
            .json(payload)
            .send()
            .context("Failed to send Discord webhook")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            anyhow::bail!("Discord webhook returned {}: {}", status, body);
        }
        Ok(())
    }
}

impl Notifier for DiscordNotifier {
    fn notify(&self, event: &SnapshotEvent) {
        if let Err(e) = self.send(event) {
            warn!("Failed to send notification: {:#}", e);
        }
    }
}

/// A notifier that remembers every event, for tests
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    pub struct RecordingNotifier {
        events: Arc<Mutex<Vec<SnapshotEvent>>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<SnapshotEvent> {
            self.events.lock().clone()
        }

        pub fn count(&self, severity: NotifyEvent) -> usize {
            self.events
                .lock()
                .iter()
                .filter(|e| e.severity() == severity)
                .count()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, event: &SnapshotEvent) {
            self.events.lock().push(event.clone());
        }
    }
}
