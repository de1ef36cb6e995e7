//! Table names, column names and DDL helpers.
//!
//! Column names are kept byte-for-byte compatible with every historical
//! version of the on-device database so that upgraded stores keep working.

use rusqlite::Connection;

pub const INSTANCES_TABLE: &str = "instances";
pub const TRACE_TABLE: &str = "trace";

/// Instance table columns.
pub mod instance_columns {
    pub const ID: &str = "_id";
    pub const DISPLAY_NAME: &str = "displayName";
    pub const SUBMISSION_URI: &str = "submissionUri";
    pub const CAN_EDIT_WHEN_COMPLETE: &str = "canEditWhenComplete";
    pub const CAN_DELETE_BEFORE_SEND: &str = "canDeleteBeforeSend";
    pub const INSTANCE_FILE_PATH: &str = "instanceFilePath";
    pub const FORM_ID: &str = "jrFormId";
    pub const FORM_VERSION: &str = "jrVersion";
    pub const STATUS: &str = "status";
    // Historical name; holds the last-status-change timestamp.
    pub const LAST_STATUS_CHANGE_DATE: &str = "date";
    pub const FINALIZATION_DATE: &str = "finalizationDate";
    pub const DELETED_DATE: &str = "deletedDate";
    pub const GEOMETRY: &str = "geometry";
    pub const GEOMETRY_TYPE: &str = "geometryType";
    pub const EDIT_OF: &str = "editOf";
    pub const EDIT_NUMBER: &str = "editNumber";

    // Task extension columns
    pub const SOURCE: &str = "source";
    pub const FORM_PATH: &str = "formPath";
    pub const ACT_LON: &str = "actLon";
    pub const ACT_LAT: &str = "actLat";
    pub const SCHED_LON: &str = "schedLon";
    pub const SCHED_LAT: &str = "schedLat";
    pub const T_TITLE: &str = "tTitle";
    pub const T_TASK_TYPE: &str = "tTaskType";
    pub const T_SCHED_START: &str = "tSchedStart";
    pub const T_SCHED_FINISH: &str = "tSchedFinish";
    pub const T_ACT_START: &str = "tActStart";
    pub const T_ACT_FINISH: &str = "tActFinish";
    pub const T_ADDRESS: &str = "tAddress";
    pub const T_IS_SYNC: &str = "tIsSync";
    pub const T_ASS_ID: &str = "tTaskId";
    pub const T_TASK_STATUS: &str = "tAssStatus";
    pub const T_TASK_COMMENT: &str = "tComment";
    pub const T_REPEAT: &str = "tRepeat";
    pub const T_UPDATEID: &str = "tUpdateId";
    pub const T_LOCATION_TRIGGER: &str = "tLocationTrigger";
    pub const T_SURVEY_NOTES: &str = "tSurveyNotes";
    pub const T_UPDATED: &str = "tUpdated";
    pub const UUID: &str = "uuid";
    pub const T_SHOW_DIST: &str = "tShowDist";
    pub const T_HIDE: &str = "tHide";
    pub const PHONE: &str = "phone";
}

/// Trace table columns.
pub mod trace_columns {
    pub const ID: &str = "_id";
    pub const SOURCE: &str = "source";
    pub const LAT: &str = "lat";
    pub const LON: &str = "lon";
    pub const TIME: &str = "time";
}

/// Generic columns as of schema version 5, used by the destructive rebuild
/// that removed the legacy display-subtext column.
pub const INSTANCE_COLUMNS_V5: &[&str] = &[
    instance_columns::ID,
    instance_columns::DISPLAY_NAME,
    instance_columns::SUBMISSION_URI,
    instance_columns::CAN_EDIT_WHEN_COMPLETE,
    instance_columns::INSTANCE_FILE_PATH,
    instance_columns::FORM_ID,
    instance_columns::FORM_VERSION,
    instance_columns::STATUS,
    instance_columns::LAST_STATUS_CHANGE_DATE,
    instance_columns::DELETED_DATE,
];

/// Generic columns as of schema version 6 (v5 plus geometry).
pub const INSTANCE_COLUMNS_V6: &[&str] = &[
    instance_columns::ID,
    instance_columns::DISPLAY_NAME,
    instance_columns::SUBMISSION_URI,
    instance_columns::CAN_EDIT_WHEN_COMPLETE,
    instance_columns::INSTANCE_FILE_PATH,
    instance_columns::FORM_ID,
    instance_columns::FORM_VERSION,
    instance_columns::STATUS,
    instance_columns::LAST_STATUS_CHANGE_DATE,
    instance_columns::DELETED_DATE,
    instance_columns::GEOMETRY,
    instance_columns::GEOMETRY_TYPE,
];

/// Emit the instances table at the current schema version.
pub fn create_instances_table_current(conn: &Connection) -> rusqlite::Result<()> {
    use instance_columns as c;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            {id} integer primary key autoincrement,
            {display_name} text not null,
            {submission_uri} text,
            {can_edit} text,
            {can_delete} text,
            {file_path} text not null,
            {form_id} text not null,
            {form_version} text,
            {status} text not null,
            {last_change} date not null,
            {finalization} date,
            {deleted} date,
            {geometry} text,
            {geometry_type} text,
            {edit_of} integer REFERENCES {table}({id}) CHECK ({edit_of} != {id}),
            {edit_number} integer CHECK (({edit_of} IS NULL AND {edit_number} IS NULL)
                OR ({edit_of} IS NOT NULL AND {edit_number} IS NOT NULL)),
            {source} text,
            {form_path} text,
            {act_lon} double,
            {act_lat} double,
            {sched_lon} double,
            {sched_lat} double,
            {t_title} text,
            {t_task_type} text,
            {t_sched_start} long,
            {t_sched_finish} long,
            {t_act_start} long,
            {t_act_finish} long,
            {t_address} text,
            {t_is_sync} text,
            {t_ass_id} long,
            {t_task_status} text,
            {t_comment} text,
            {t_repeat} integer,
            {t_update_id} text,
            {t_location_trigger} text,
            {t_survey_notes} text,
            {t_updated} integer,
            {uuid} text,
            {t_show_dist} integer,
            {t_hide} integer,
            {phone} text
        );",
        table = INSTANCES_TABLE,
        id = c::ID,
        display_name = c::DISPLAY_NAME,
        submission_uri = c::SUBMISSION_URI,
        can_edit = c::CAN_EDIT_WHEN_COMPLETE,
        can_delete = c::CAN_DELETE_BEFORE_SEND,
        file_path = c::INSTANCE_FILE_PATH,
        form_id = c::FORM_ID,
        form_version = c::FORM_VERSION,
        status = c::STATUS,
        last_change = c::LAST_STATUS_CHANGE_DATE,
        finalization = c::FINALIZATION_DATE,
        deleted = c::DELETED_DATE,
        geometry = c::GEOMETRY,
        geometry_type = c::GEOMETRY_TYPE,
        edit_of = c::EDIT_OF,
        edit_number = c::EDIT_NUMBER,
        source = c::SOURCE,
        form_path = c::FORM_PATH,
        act_lon = c::ACT_LON,
        act_lat = c::ACT_LAT,
        sched_lon = c::SCHED_LON,
        sched_lat = c::SCHED_LAT,
        t_title = c::T_TITLE,
        t_task_type = c::T_TASK_TYPE,
        t_sched_start = c::T_SCHED_START,
        t_sched_finish = c::T_SCHED_FINISH,
        t_act_start = c::T_ACT_START,
        t_act_finish = c::T_ACT_FINISH,
        t_address = c::T_ADDRESS,
        t_is_sync = c::T_IS_SYNC,
        t_ass_id = c::T_ASS_ID,
        t_task_status = c::T_TASK_STATUS,
        t_comment = c::T_TASK_COMMENT,
        t_repeat = c::T_REPEAT,
        t_update_id = c::T_UPDATEID,
        t_location_trigger = c::T_LOCATION_TRIGGER,
        t_survey_notes = c::T_SURVEY_NOTES,
        t_updated = c::T_UPDATED,
        uuid = c::UUID,
        t_show_dist = c::T_SHOW_DIST,
        t_hide = c::T_HIDE,
        phone = c::PHONE,
    ))
}

/// Emit the trace table at the current schema version.
pub fn create_trace_table_current(conn: &Connection) -> rusqlite::Result<()> {
    use trace_columns as c;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            {id} integer primary key,
            {source} text,
            {lat} double not null,
            {lon} double not null,
            {time} long not null
        );",
        table = TRACE_TABLE,
        id = c::ID,
        source = c::SOURCE,
        lat = c::LAT,
        lon = c::LON,
        time = c::TIME,
    ))
}

// =============================================================================
// Introspection and DDL helpers
// =============================================================================

/// Whether the named table exists.
pub fn does_table_exist(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Whether the named column exists on the table.
pub fn does_column_exist(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    Ok(column_names(conn, table)?.iter().any(|c| c == column))
}

/// All column names of a table, in declaration order.
pub fn column_names(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info('{table}')"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Add a nullable column. Callers guard with [`does_column_exist`] where the
/// step must be idempotent under partial-failure retry.
pub fn add_column(
    conn: &Connection,
    table: &str,
    column: &str,
    sql_type: &str,
) -> rusqlite::Result<()> {
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {sql_type};"))
}

/// Copy the named columns from one table into another.
pub fn copy_rows(
    conn: &Connection,
    from: &str,
    columns: &[&str],
    to: &str,
) -> rusqlite::Result<()> {
    let cols = columns.join(", ");
    conn.execute_batch(&format!("INSERT INTO {to} ({cols}) SELECT {cols} FROM {from};"))
}

pub fn drop_table(conn: &Connection, table: &str) -> rusqlite::Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))
}

pub fn rename_table(conn: &Connection, from: &str, to: &str) -> rusqlite::Result<()> {
    conn.execute_batch(&format!("ALTER TABLE {from} RENAME TO {to};"))
}
