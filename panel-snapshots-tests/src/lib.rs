//! Test utilities for panel-snapshots
//!
//! This crate provides shared test utilities, mock implementations,
//! and helper functions for testing the panel-snapshots library.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use test_utils::{SnapshotHarness, SITE};
//!
//! #[test]
//! fn my_test() {
//!     let harness = SnapshotHarness::new();
//!     let manager = harness.manager(5);
//!     // ... test code
//! }
//! ```

pub mod config_builder;
pub mod fixtures;
pub mod test_context;

// Re-export commonly used items
pub use config_builder::ConfigBuilder;
pub use fixtures::*;
pub use test_context::{ResultAssertions, SnapshotHarness, TestContext};

// Re-export types from the main crate for convenience
pub use panel_snapshots::catalog::{
    CategoryStats, ComponentStatus, JsonCatalog, MemoryCatalog, NewSnapshot, ResourceKind,
    Snapshot, SnapshotCatalog, SnapshotStatus,
};
pub use panel_snapshots::config::{
    Config, DatabaseConfig, DatabaseEngine, FullSystemConfig, GlobalConfig, NotificationConfig,
    NotifyEvent, RetentionPolicy,
};
pub use panel_snapshots::error::{ErrorKind, SnapshotError};
pub use panel_snapshots::locator::{DatabaseConnection, ResourceSource, StaticLocator};
pub use panel_snapshots::managers::snapshot::{ManagerSettings, RestoreStatus, SnapshotManager};
pub use panel_snapshots::strategies::FileAction;
pub use panel_snapshots::CancellationToken;

// Re-export mock implementations from the main crate
pub use panel_snapshots::managers::notification::mock::RecordingNotifier;
pub use panel_snapshots::platform::mock::{MockPlatform, PlatformCall};
pub use panel_snapshots::utils::executor::mock::{MockExecutor, MockResponse};
pub use panel_snapshots::utils::executor::CommandExecutor;
