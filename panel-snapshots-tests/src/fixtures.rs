//! Test fixtures and sample data
//!
//! Provides pre-built records, trees and config templates for testing.

use chrono::{DateTime, Duration, TimeZone, Utc};
use panel_snapshots::catalog::{ResourceKind, Snapshot, SnapshotStatus};
use std::fs;
use std::path::{Path, PathBuf};

/// Virtual host used throughout the suite
pub const SITE: &str = "shop.example.com";

/// Database used throughout the suite
pub const DATABASE: &str = "shop_db";

pub const MB: u64 = 1024 * 1024;

/// Fixed point in time fixture records are created relative to
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Create a completed snapshot record `offset_secs` after [`base_time`]
pub fn sample_snapshot(id: u64, kind: ResourceKind, resource_ref: &str, size_bytes: u64, offset_secs: i64) -> Snapshot {
    let created_at = base_time() + Duration::seconds(offset_secs);
    Snapshot {
        id,
        resource_kind: kind,
        resource_ref: Some(resource_ref.to_string()),
        artifact_path: PathBuf::from(format!("/backups/{}/{}/{}-{}.tar.gz", kind, resource_ref, resource_ref, id)),
        size_bytes,
        status: SnapshotStatus::Completed,
        created_at,
        completed_at: Some(created_at + Duration::seconds(3)),
        components: vec![],
        error: None,
    }
}

/// Create `count` completed snapshots of one resource, one minute apart
pub fn sample_snapshots(kind: ResourceKind, resource_ref: &str, count: usize) -> Vec<Snapshot> {
    (0..count)
        .map(|i| sample_snapshot(i as u64 + 1, kind, resource_ref, MB, i as i64 * 60))
        .collect()
}

/// Files of a small website: `index.html`, `about.html`, `css/site.css`
pub fn site_files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("index.html", "<h1>Shop</h1>"),
        ("about.html", "<p>About us</p>"),
        ("css/site.css", "body { margin: 0; }"),
    ]
}

/// Write `files` under `root`, creating parent directories
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, contents) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&path, contents).expect("Failed to write file");
    }
}

/// Relative paths of every regular file under `root`, sorted, with `/` separators
pub fn list_tree(root: &Path) -> Vec<String> {
    let mut files = Vec::new();
    collect(root, root, &mut files);
    files.sort();
    files
}

fn collect(root: &Path, dir: &Path, files: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, files);
        } else if let Ok(relative) = path.strip_prefix(root) {
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
}

/// Minimal valid config TOML template
///
/// Placeholders: `{backup_root}`, `{www}`, `{log_dir}`.
pub fn minimal_config_toml() -> &'static str {
    r#"
[global]
backup_root = '{backup_root}'
log_directory = '{log_dir}'
max_snapshots = 5

[locations]
virtualHost = '{www}/{ref}'
"#
}

/// Config with retention overrides, a database and reload hooks
pub fn full_config_toml() -> &'static str {
    r#"
[global]
backup_root = '{backup_root}'
log_directory = '{log_dir}'
max_snapshots = 5
operation_timeout_seconds = 0

[retention]
database = 10
logSet = 2

[locations]
virtualHost = '{www}/{ref}'
logSet = '{www}/{ref}/logs'

[database]
engine = "postgres"
host = "db.internal"
user = "panel"

[full_system]
files_root = '{www}'
config_root = '{www}/../etc'

[reload]
virtualHost = "apache2"
dnsZone = ""

[notifications]
notify_on = ["failure", "warning"]
rate_limit_minutes = 30
"#
}

/// Substitute the template placeholders
pub fn render_config(template: &str, backup_root: &Path, www: &Path, log_dir: &Path) -> String {
    template
        .replace("{backup_root}", &backup_root.display().to_string())
        .replace("{www}", &www.display().to_string())
        .replace("{log_dir}", &log_dir.display().to_string())
}
