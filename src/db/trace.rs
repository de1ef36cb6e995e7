//! Append-only GPS trail, kept in its own database file so the high write
//! rate never contends with instance writes.

use super::{Database, MigrationOutcome, Migrator};
use crate::error::{Result, StoreError};
use crate::paths;
use crate::types::TracePoint;
use rusqlite::params;
use std::path::Path;

#[derive(Clone)]
pub struct TraceStore {
    db: Database,
}

impl TraceStore {
    /// Open or create the trace database under `root/metadata/`.
    pub fn open(root: &Path) -> Result<(Self, MigrationOutcome)> {
        let (db, outcome) = Database::open(paths::trace_db_path(root), &Migrator::trace())?;
        Ok((Self { db }, outcome))
    }

    pub fn open_in_memory() -> Result<(Self, MigrationOutcome)> {
        let (db, outcome) = Database::open_in_memory(&Migrator::trace())?;
        Ok((Self { db }, outcome))
    }

    /// Append one point for the given source.
    pub fn insert_point(&self, source: &str, lat: f64, lon: f64, time: i64) -> Result<i64> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO trace (source, lat, lon, time) VALUES (?1, ?2, ?3, ?4)",
                params![source, lat, lon, time],
            )
            .map_err(StoreError::from)?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Points for one source in insertion order, newest first when
    /// `descending`, capped at `limit` rows.
    pub fn points(&self, source: &str, limit: usize, descending: bool) -> Result<Vec<TracePoint>> {
        let order = if descending { "DESC" } else { "ASC" };
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT _id, source, lat, lon, time FROM trace
                     WHERE source = ?1 ORDER BY _id {order} LIMIT ?2"
                ))
                .map_err(StoreError::from)?;
            let rows = stmt
                .query_map(params![source, limit as i64], |row| {
                    Ok(TracePoint {
                        id: row.get(0)?,
                        source: row.get(1)?,
                        lat: row.get(2)?,
                        lon: row.get(3)?,
                        time: row.get(4)?,
                    })
                })
                .map_err(StoreError::from)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(StoreError::from)?;
            Ok(rows)
        })
    }

    pub fn count(&self, source: &str) -> Result<i64> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM trace WHERE source = ?1",
                params![source],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
        })
    }

    /// Delete points for a source, either all of them or only those up to and
    /// including the given row id (points already uploaded to the server).
    pub fn delete_points(&self, source: &str, up_to_id: Option<i64>) -> Result<usize> {
        self.db.with_conn(|conn| {
            let deleted = match up_to_id {
                Some(max_id) => conn.execute(
                    "DELETE FROM trace WHERE source = ?1 AND _id <= ?2",
                    params![source, max_id],
                ),
                None => conn.execute("DELETE FROM trace WHERE source = ?1", params![source]),
            }
            .map_err(StoreError::from)?;
            Ok(deleted)
        })
    }

    /// Administrative escape hatch: drop the trail for every source and
    /// recreate the table at the current version.
    pub fn reset(&self) -> Result<()> {
        self.db.with_conn(|conn| {
            super::schema::drop_table(conn, super::schema::TRACE_TABLE).map_err(StoreError::from)?;
            super::schema::create_trace_table_current(conn).map_err(StoreError::from)?;
            Ok(())
        })
    }
}
