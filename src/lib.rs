//! Panel Snapshots Library
//!
//! Point-in-time backup, count-based retention and overwrite-only restore for
//! the resources a hosting control panel manages (databases, virtual hosts,
//! mail/FTP/SSH accounts, certificates and the rest).

pub mod catalog;
pub mod config;
pub mod error;
pub mod locator;
pub mod managers;
pub mod platform;
pub mod strategies;
pub mod utils;

// Re-export commonly used types
pub use catalog::{
    CategoryStats, JsonCatalog, MemoryCatalog, ResourceKind, Snapshot, SnapshotCatalog,
    SnapshotDescriptor, SnapshotStatus,
};
pub use config::{load_config, resolve_settings, Config, ResolvedSettings};
pub use error::{ErrorKind, OperationResult, SnapshotError};
pub use locator::{ConfigLocator, ResourceLocator, ResourceSource};
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use managers::notification::{Notifier, SnapshotEvent};
pub use managers::snapshot::{ManagerSettings, RestoreReport, SnapshotManager};
pub use platform::Platform;
pub use tokio_util::sync::CancellationToken;
