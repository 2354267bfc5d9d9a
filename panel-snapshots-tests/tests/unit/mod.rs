//! Unit tests for panel-snapshots
//!
//! Configuration, catalog persistence and the platform tool invocations,
//! without touching real services.

mod catalog;
mod config;
