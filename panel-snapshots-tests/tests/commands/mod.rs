//! Command tests for panel-snapshots
//!
//! These tests drive the snapshot manager with a mocked platform, an
//! in-memory catalog and real files in a temp dir.

mod backup;
mod catalog_ops;
mod restore;
mod retention;
