//! Configuration module for panel-snapshots
//!
//! This module handles loading, validating, and resolving configuration from TOML files.
//!
//! ## Resolution
//!
//! Settings are applied in this order (later overrides earlier):
//! 1. Built-in defaults (retention of 5, per-kind root templates, reload services)
//! 2. `[global]` settings
//! 3. Per-kind tables (`[retention]`, `[locations]`, `[reload]`)
//!
//! ## Example Usage
//!
//! ```no_run
//! use panel_snapshots::config;
//!
//! let config = config::load_config("panel-snapshots.toml")?;
//! let settings = config::resolve_settings(&config)?;
//!
//! println!("Backups under {:?}, keeping {}", settings.backup_root, settings.retention.max_snapshots);
//! # Ok::<(), config::ConfigError>(())
//! ```

mod loader;
mod types;

pub use loader::{catalog_path, load_config, resolve_settings, ConfigError, Result};
pub use types::*;

/// Expand tilde (~) in path
pub fn expand_tilde(path: &std::path::Path) -> std::path::PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

/// Fill `{ref}` in a location template
pub fn render_location(template: &str, resource_ref: Option<&str>) -> std::path::PathBuf {
    let rendered = match resource_ref {
        Some(r) => template.replace("{ref}", r),
        None => template.replace("/{ref}", "").replace("{ref}", ""),
    };
    expand_tilde(std::path::Path::new(&rendered))
}
