//! Offline-first task store for field data collection.
//!
//! One SQLite-backed instance store tracks every form-filling attempt and the
//! server-issued assignments layered on top, with a versioned schema migrator
//! that upgrades stores written by any historical release. A second,
//! independent database records the GPS trail. The sync engine merges the
//! server's assignment list into the store without ever holding locks across
//! network I/O, and the trigger matcher resolves NFC/geofence stimuli to
//! tasks.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod paths;
pub mod status;
pub mod sync;
pub mod triggers;
pub mod types;

pub use db::{Database, InstanceStore, MigrationOutcome, Migrator, TraceStore};
pub use error::{Result, StoreError, TransportError};
