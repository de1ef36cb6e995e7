//! Versioned schema migration engine.
//!
//! The historical upgrade chain is an ordered list of idempotent steps, each
//! stamped with the version it brings the store to. On open, all steps past
//! the stored version run in order, one transaction per step, so a
//! mid-upgrade failure leaves the store at the last completed version and a
//! later open simply retries the rest.
//!
//! Three shapes of step exist:
//! - *additive*: add a nullable column, guarded by a does-column-exist check;
//! - *destructive*: rebuild the table through a temporary copy (SQLite has no
//!   direct column removal);
//! - *backfill*: data-only update populating a new column from existing rows.
//!
//! Versions 12 through 26 were used by an older sibling product whose stores
//! may lack several generic columns; they share a single ensure-columns
//! recovery step that is safe to run redundantly.

use super::schema::{
    self, INSTANCES_TABLE, INSTANCE_COLUMNS_V5, INSTANCE_COLUMNS_V6, TRACE_TABLE,
    instance_columns as col, trace_columns,
};
use crate::error::{Result, StoreError};
use rusqlite::Connection;
use serde::Serialize;

/// Current version of the instances database.
pub const INSTANCES_SCHEMA_VERSION: i32 = 27;

/// Current version of the trace database.
pub const TRACE_SCHEMA_VERSION: i32 = 2;

type StepFn = fn(&Connection) -> rusqlite::Result<()>;

/// One upgrade step; `version` is the schema version the store holds after
/// the step commits.
pub struct MigrationStep {
    pub version: i32,
    pub description: &'static str,
    apply: StepFn,
}

/// What `Database::open` did to the store, replacing the old global
/// "migration in progress" flag with explicit state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// Store created at the current version directly, no replay.
    Fresh { version: i32 },
    /// Store already at the current version; open was a no-op.
    Current { version: i32 },
    Upgraded {
        from: i32,
        to: i32,
        steps: Vec<String>,
    },
    /// The store was written by a newer release. Data is left untouched;
    /// downgrade is not a supported data operation.
    DowngradeAttempted { stored: i32, supported: i32 },
}

impl MigrationOutcome {
    pub fn version(&self) -> i32 {
        match self {
            MigrationOutcome::Fresh { version } | MigrationOutcome::Current { version } => *version,
            MigrationOutcome::Upgraded { to, .. } => *to,
            MigrationOutcome::DowngradeAttempted { stored, .. } => *stored,
        }
    }
}

/// Ordered step list plus current-version DDL for one table.
pub struct Migrator {
    table: &'static str,
    target: i32,
    create_current: StepFn,
    steps: Vec<MigrationStep>,
}

impl Migrator {
    /// Migrator for the instances database.
    pub fn instances() -> Self {
        Self {
            table: INSTANCES_TABLE,
            target: INSTANCES_SCHEMA_VERSION,
            create_current: |conn| schema::create_instances_table_current(conn),
            steps: vec![
                MigrationStep {
                    version: 2,
                    description: "add canEditWhenComplete, backfill for finalized rows",
                    apply: upgrade_instances_to_v2,
                },
                MigrationStep {
                    version: 3,
                    description: "add jrVersion",
                    apply: |conn| add_if_missing(conn, col::FORM_VERSION, "text"),
                },
                MigrationStep {
                    version: 4,
                    description: "add deletedDate",
                    apply: |conn| add_if_missing(conn, col::DELETED_DATE, "date"),
                },
                MigrationStep {
                    version: 5,
                    description: "drop legacy displaySubtext column",
                    apply: upgrade_instances_to_v5,
                },
                MigrationStep {
                    version: 6,
                    description: "add geometry, geometryType",
                    apply: |conn| {
                        add_if_missing(conn, col::GEOMETRY, "text")?;
                        add_if_missing(conn, col::GEOMETRY_TYPE, "text")
                    },
                },
                MigrationStep {
                    version: 7,
                    description: "rebuild with autoincrement primary key",
                    apply: upgrade_instances_to_v7,
                },
                MigrationStep {
                    version: 8,
                    description: "add canDeleteBeforeSend, backfill true",
                    apply: upgrade_instances_to_v8,
                },
                MigrationStep {
                    version: 9,
                    description: "add editOf, editNumber with lineage checks",
                    apply: upgrade_instances_to_v9,
                },
                MigrationStep {
                    version: 10,
                    description: "add finalizationDate, backfill from last status change",
                    apply: upgrade_instances_to_v10,
                },
                MigrationStep {
                    version: 11,
                    description: "add task extension columns",
                    apply: upgrade_instances_to_v11,
                },
                // Versions 12-26 were used by the older sibling product; one
                // redundancy-safe recovery step covers the whole block.
                MigrationStep {
                    version: INSTANCES_SCHEMA_VERSION,
                    description: "ensure generic columns exist (legacy store recovery)",
                    apply: ensure_generic_columns,
                },
            ],
        }
    }

    /// Migrator for the trace database.
    pub fn trace() -> Self {
        Self {
            table: TRACE_TABLE,
            target: TRACE_SCHEMA_VERSION,
            create_current: |conn| schema::create_trace_table_current(conn),
            steps: vec![MigrationStep {
                version: TRACE_SCHEMA_VERSION,
                description: "add source partition column",
                apply: |conn| {
                    if !schema::does_column_exist(conn, TRACE_TABLE, trace_columns::SOURCE)? {
                        schema::add_column(conn, TRACE_TABLE, trace_columns::SOURCE, "text")?;
                    }
                    Ok(())
                },
            }],
        }
    }

    pub fn target_version(&self) -> i32 {
        self.target
    }

    /// Bring the store to the current version.
    ///
    /// Each pending step runs in its own transaction that also stamps the new
    /// version, so the store never claims a version it does not have.
    pub fn run(&self, conn: &mut Connection) -> Result<MigrationOutcome> {
        let mut stored: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(StoreError::from)?;

        if !schema::does_table_exist(conn, self.table).map_err(StoreError::from)? {
            // First creation: emit the current version directly, no replay.
            let tx = conn.transaction().map_err(StoreError::from)?;
            (self.create_current)(&tx).map_err(|e| StoreError::Schema {
                version: self.target,
                message: e.to_string(),
            })?;
            tx.pragma_update(None, "user_version", self.target)
                .map_err(StoreError::from)?;
            tx.commit().map_err(StoreError::from)?;
            return Ok(MigrationOutcome::Fresh {
                version: self.target,
            });
        }

        if stored == 0 {
            // Table exists but was never stamped: a pre-versioning store.
            stored = 1;
        }

        if stored > self.target {
            tracing::warn!(
                table = self.table,
                stored,
                supported = self.target,
                "store written by a newer release; leaving data untouched"
            );
            return Ok(MigrationOutcome::DowngradeAttempted {
                stored,
                supported: self.target,
            });
        }

        if stored == self.target {
            return Ok(MigrationOutcome::Current { version: stored });
        }

        tracing::info!(table = self.table, from = stored, to = self.target, "upgrading store");

        let mut applied = Vec::new();
        for step in self.steps.iter().filter(|s| s.version > stored) {
            let tx = conn.transaction().map_err(StoreError::from)?;
            (step.apply)(&tx).map_err(|e| StoreError::Schema {
                version: step.version,
                message: format!("{}: {e}", step.description),
            })?;
            tx.pragma_update(None, "user_version", step.version)
                .map_err(StoreError::from)?;
            tx.commit().map_err(StoreError::from)?;

            tracing::info!(table = self.table, version = step.version, step = step.description, "applied migration step");
            applied.push(step.description.to_string());
        }

        Ok(MigrationOutcome::Upgraded {
            from: stored,
            to: self.target,
            steps: applied,
        })
    }
}

// =============================================================================
// Instance upgrade steps
// =============================================================================

fn add_if_missing(conn: &Connection, column: &str, sql_type: &str) -> rusqlite::Result<()> {
    if !schema::does_column_exist(conn, INSTANCES_TABLE, column)? {
        schema::add_column(conn, INSTANCES_TABLE, column, sql_type)?;
    }
    Ok(())
}

fn upgrade_instances_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    if !schema::does_column_exist(conn, INSTANCES_TABLE, col::CAN_EDIT_WHEN_COMPLETE)? {
        schema::add_column(conn, INSTANCES_TABLE, col::CAN_EDIT_WHEN_COMPLETE, "text")?;
        conn.execute(
            &format!(
                "UPDATE {t} SET {c} = 'true'
                 WHERE {status} IS NOT NULL AND {status} != 'incomplete'",
                t = INSTANCES_TABLE,
                c = col::CAN_EDIT_WHEN_COMPLETE,
                status = col::STATUS,
            ),
            [],
        )?;
    }
    Ok(())
}

/// Earlier versions carried a redundant, unlocalized `displaySubtext` column.
/// SQLite cannot drop a column directly, so the rows move through a temporary
/// table that keeps only the v5 column set.
fn upgrade_instances_to_v5(conn: &Connection) -> rusqlite::Result<()> {
    let tmp = format!("{INSTANCES_TABLE}_tmp");
    // A failed earlier attempt may have left the temporary table behind.
    schema::drop_table(conn, &tmp)?;
    create_instances_table_v5(conn, &tmp)?;

    let existing = schema::column_names(conn, INSTANCES_TABLE)?;
    let keep: Vec<&str> = INSTANCE_COLUMNS_V5
        .iter()
        .copied()
        .filter(|c| existing.iter().any(|e| e == c))
        .collect();

    schema::copy_rows(conn, INSTANCES_TABLE, &keep, &tmp)?;
    schema::drop_table(conn, INSTANCES_TABLE)?;
    schema::rename_table(conn, &tmp, INSTANCES_TABLE)
}

fn upgrade_instances_to_v7(conn: &Connection) -> rusqlite::Result<()> {
    let tmp = format!("{INSTANCES_TABLE}_tmp");
    schema::drop_table(conn, &tmp)?;
    schema::rename_table(conn, INSTANCES_TABLE, &tmp)?;
    create_instances_table_v7(conn, INSTANCES_TABLE)?;

    let existing = schema::column_names(conn, &tmp)?;
    let keep: Vec<&str> = INSTANCE_COLUMNS_V6
        .iter()
        .copied()
        .filter(|c| existing.iter().any(|e| e == c))
        .collect();

    schema::copy_rows(conn, &tmp, &keep, INSTANCES_TABLE)?;
    schema::drop_table(conn, &tmp)
}

fn upgrade_instances_to_v8(conn: &Connection) -> rusqlite::Result<()> {
    if !schema::does_column_exist(conn, INSTANCES_TABLE, col::CAN_DELETE_BEFORE_SEND)? {
        schema::add_column(conn, INSTANCES_TABLE, col::CAN_DELETE_BEFORE_SEND, "text")?;
        conn.execute(
            &format!(
                "UPDATE {INSTANCES_TABLE} SET {c} = 'true'",
                c = col::CAN_DELETE_BEFORE_SEND
            ),
            [],
        )?;
    }
    Ok(())
}

fn upgrade_instances_to_v9(conn: &Connection) -> rusqlite::Result<()> {
    if !schema::does_column_exist(conn, INSTANCES_TABLE, col::EDIT_OF)? {
        conn.execute_batch(&format!(
            "ALTER TABLE {t} ADD COLUMN {edit_of} integer REFERENCES {t}({id}) CHECK ({edit_of} != {id});",
            t = INSTANCES_TABLE,
            id = col::ID,
            edit_of = col::EDIT_OF,
        ))?;
    }
    if !schema::does_column_exist(conn, INSTANCES_TABLE, col::EDIT_NUMBER)? {
        conn.execute_batch(&format!(
            "ALTER TABLE {t} ADD COLUMN {edit_number} integer CHECK \
             (({edit_of} IS NULL AND {edit_number} IS NULL) OR ({edit_of} IS NOT NULL AND {edit_number} IS NOT NULL));",
            t = INSTANCES_TABLE,
            edit_of = col::EDIT_OF,
            edit_number = col::EDIT_NUMBER,
        ))?;
    }
    Ok(())
}

fn upgrade_instances_to_v10(conn: &Connection) -> rusqlite::Result<()> {
    if !schema::does_column_exist(conn, INSTANCES_TABLE, col::FINALIZATION_DATE)? {
        schema::add_column(conn, INSTANCES_TABLE, col::FINALIZATION_DATE, "date")?;
        conn.execute(
            &format!(
                "UPDATE {t} SET {fin} = {last} WHERE {status} IN (?1, ?2, ?3)",
                t = INSTANCES_TABLE,
                fin = col::FINALIZATION_DATE,
                last = col::LAST_STATUS_CHANGE_DATE,
                status = col::STATUS,
            ),
            ["complete", "submitted", "submissionFailed"],
        )?;
    }
    Ok(())
}

const TASK_EXTENSION_COLUMNS: &[(&str, &str)] = &[
    (col::SOURCE, "text"),
    (col::FORM_PATH, "text"),
    (col::ACT_LON, "double"),
    (col::ACT_LAT, "double"),
    (col::SCHED_LON, "double"),
    (col::SCHED_LAT, "double"),
    (col::T_TITLE, "text"),
    (col::T_TASK_TYPE, "text"),
    (col::T_SCHED_START, "long"),
    (col::T_SCHED_FINISH, "long"),
    (col::T_ACT_START, "long"),
    (col::T_ACT_FINISH, "long"),
    (col::T_ADDRESS, "text"),
    (col::T_IS_SYNC, "text"),
    (col::T_ASS_ID, "long"),
    (col::T_TASK_STATUS, "text"),
    (col::T_TASK_COMMENT, "text"),
    (col::T_REPEAT, "integer"),
    (col::T_UPDATEID, "text"),
    (col::T_LOCATION_TRIGGER, "text"),
    (col::T_SURVEY_NOTES, "text"),
    (col::T_UPDATED, "integer"),
    (col::UUID, "text"),
    (col::T_SHOW_DIST, "integer"),
    (col::T_HIDE, "integer"),
    (col::PHONE, "text"),
];

fn upgrade_instances_to_v11(conn: &Connection) -> rusqlite::Result<()> {
    for (column, sql_type) in TASK_EXTENSION_COLUMNS {
        add_if_missing(conn, column, sql_type)?;
    }
    Ok(())
}

/// Stores written by the older sibling product (versions 12-26) may be
/// missing any of the later generic columns. Redundancy-safe by design.
fn ensure_generic_columns(conn: &Connection) -> rusqlite::Result<()> {
    for (column, sql_type) in [
        (col::GEOMETRY, "text"),
        (col::GEOMETRY_TYPE, "text"),
        (col::CAN_DELETE_BEFORE_SEND, "text"),
    ] {
        if !schema::does_column_exist(conn, INSTANCES_TABLE, column)? {
            tracing::info!(column, "adding missing generic column");
            schema::add_column(conn, INSTANCES_TABLE, column, sql_type)?;
        }
    }
    // Lineage and finalization columns carry their constraints and backfill.
    upgrade_instances_to_v9(conn)?;
    upgrade_instances_to_v10(conn)?;
    // Task columns may also be missing from very old exports.
    upgrade_instances_to_v11(conn)
}

// =============================================================================
// Historical DDL (used only while replaying old steps)
// =============================================================================

fn create_instances_table_v5(conn: &Connection, name: &str) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {name} (
            {id} integer primary key,
            {display_name} text not null,
            {submission_uri} text,
            {can_edit} text,
            {file_path} text not null,
            {form_id} text not null,
            {form_version} text,
            {status} text not null,
            {last_change} date not null,
            {deleted} date
        );",
        id = col::ID,
        display_name = col::DISPLAY_NAME,
        submission_uri = col::SUBMISSION_URI,
        can_edit = col::CAN_EDIT_WHEN_COMPLETE,
        file_path = col::INSTANCE_FILE_PATH,
        form_id = col::FORM_ID,
        form_version = col::FORM_VERSION,
        status = col::STATUS,
        last_change = col::LAST_STATUS_CHANGE_DATE,
        deleted = col::DELETED_DATE,
    ))
}

fn create_instances_table_v7(conn: &Connection, name: &str) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {name} (
            {id} integer primary key autoincrement,
            {display_name} text not null,
            {submission_uri} text,
            {can_edit} text,
            {file_path} text not null,
            {form_id} text not null,
            {form_version} text,
            {status} text not null,
            {last_change} date not null,
            {deleted} date,
            {geometry} text,
            {geometry_type} text
        );",
        id = col::ID,
        display_name = col::DISPLAY_NAME,
        submission_uri = col::SUBMISSION_URI,
        can_edit = col::CAN_EDIT_WHEN_COMPLETE,
        file_path = col::INSTANCE_FILE_PATH,
        form_id = col::FORM_ID,
        form_version = col::FORM_VERSION,
        status = col::STATUS,
        last_change = col::LAST_STATUS_CHANGE_DATE,
        deleted = col::DELETED_DATE,
        geometry = col::GEOMETRY,
        geometry_type = col::GEOMETRY_TYPE,
    ))
}
