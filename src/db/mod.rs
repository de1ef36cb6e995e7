//! SQLite storage layer: shared connection handle, schema and migrations.

pub mod instances;
pub mod migrations;
pub mod schema;
pub mod trace;

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use instances::InstanceStore;
pub use migrations::{MigrationOutcome, Migrator};
pub use trace::TraceStore;

/// Handle wrapping a single writer-capable SQLite connection.
///
/// All store calls are serialized through the inner mutex so a concurrent
/// "needs upgrade" check can never race an in-progress migration.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path and bring it to the
    /// migrator's current version.
    pub fn open<P: AsRef<Path>>(path: P, migrator: &Migrator) -> Result<(Self, MigrationOutcome)> {
        if let Some(dir) = path.as_ref().parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path).map_err(crate::error::StoreError::from)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )
        .map_err(crate::error::StoreError::from)?;

        Self::finish_open(conn, migrator)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory(migrator: &Migrator) -> Result<(Self, MigrationOutcome)> {
        let conn = Connection::open_in_memory().map_err(crate::error::StoreError::from)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(crate::error::StoreError::from)?;
        Self::finish_open(conn, migrator)
    }

    fn finish_open(mut conn: Connection, migrator: &Migrator) -> Result<(Self, MigrationOutcome)> {
        let outcome = migrator.run(&mut conn)?;
        Ok((
            Self {
                conn: Arc::new(Mutex::new(conn)),
            },
            outcome,
        ))
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for
    /// transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().unwrap();
        f(&mut conn)
    }
}

/// Current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
