//! Integration tests for panel-snapshots
//!
//! The filesystem tests run the fully wired manager against real
//! directories. The database tests require Docker.
//! Run with: `cargo test -p panel-snapshots-tests --test integration -- --ignored`
