//! Console and rolling-file logging
//!
//! The console always gets human-readable INFO output on stderr so stdout
//! stays free for `--json` results. The file layer rotates daily under the
//! configured directory, at the configured level, as text or JSON lines.

use crate::config::{expand_tilde, GlobalConfig, LogFormat};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const LOG_FILE_PREFIX: &str = "panel-snapshots.log";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_directory: PathBuf,
    /// Level of the file layer; `RUST_LOG` overrides it
    pub file_level: Level,
    pub format: LogFormat,
    /// Rotated files kept in `log_directory`
    pub max_files: usize,
}

impl LoggingConfig {
    /// Unknown level names fall back to INFO
    pub fn new(log_directory: &Path, level: &str, format: LogFormat, max_files: usize) -> Self {
        Self {
            log_directory: expand_tilde(log_directory),
            file_level: parse_level(level),
            format,
            max_files,
        }
    }

    pub fn from_global(global: &GlobalConfig) -> Self {
        Self::new(
            &global.log_directory,
            &global.log_level,
            global.log_format,
            global.log_max_files as usize,
        )
    }
}

fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_lowercase().as_str() {
        "warning" => Level::WARN,
        other => Level::from_str(other).unwrap_or(Level::INFO),
    }
}

/// Flushes buffered file output when dropped
pub struct LogGuard {
    _worker: WorkerGuard,
}

/// Install the global subscriber
///
/// Fails when the log directory cannot be created or a subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard> {
    fs::create_dir_all(&config.log_directory)
        .with_context(|| format!("Failed to create log directory {:?}", config.log_directory))?;

    let appender = RollingFileAppender::new(Rotation::DAILY, &config.log_directory, LOG_FILE_PREFIX);
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(file_layer(writer, config))
        .with(console)
        .try_init()
        .context("A global logger is already installed")?;

    let removed = prune_log_files(&config.log_directory, config.max_files)?;
    if removed > 0 {
        tracing::debug!("Removed {} old log file(s)", removed);
    }

    Ok(LogGuard { _worker: worker })
}

fn file_layer(writer: NonBlocking, config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("panel_snapshots={},warn", config.file_level))
    });

    let base = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
    match config.format {
        LogFormat::Text => base.with_filter(filter).boxed(),
        LogFormat::Json => base.json().with_current_span(false).with_filter(filter).boxed(),
    }
}

/// Console-only logging for commands that run before a config is loaded
pub fn init_console_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A second call is a no-op
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

/// Delete rotated log files beyond the newest `keep`, returning how many went
///
/// Rotated names end in the date (`panel-snapshots.log.2026-03-01`), so name
/// order is age order.
fn prune_log_files(log_dir: &Path, keep: usize) -> Result<usize> {
    let mut names: Vec<String> = fs::read_dir(log_dir)
        .with_context(|| format!("Failed to read log directory {:?}", log_dir))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(LOG_FILE_PREFIX))
        .collect();

    names.sort_unstable_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for name in names.iter().skip(keep) {
        let path = log_dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to remove old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}
