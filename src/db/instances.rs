//! The instance store: persisted form-filling attempts and the task records
//! layered on top of them.
//!
//! Reads return typed [`Instance`] values; writes go through [`save`] so the
//! lifecycle stamps (last status change, finalization) are applied in one
//! place. Deletion is a tombstone by default; the row remains the source of
//! truth and file cleanup happens only after the database write committed.
//!
//! [`save`]: InstanceStore::save

use super::{Database, MigrationOutcome, Migrator, now_ms};
use crate::error::{Result, StoreError};
use crate::paths;
use crate::status::{InstanceStatus, TaskStatus, can_complete};
use crate::types::Instance;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

/// Column list shared by every SELECT so rows always map by the same index.
const ALL_COLUMNS: &str = "_id, displayName, submissionUri, canEditWhenComplete, \
     canDeleteBeforeSend, instanceFilePath, jrFormId, jrVersion, status, date, \
     finalizationDate, deletedDate, geometry, geometryType, editOf, editNumber, \
     source, formPath, actLon, actLat, schedLon, schedLat, tTitle, tTaskType, \
     tSchedStart, tSchedFinish, tActStart, tActFinish, tAddress, tIsSync, \
     tTaskId, tAssStatus, tComment, tRepeat, tUpdateId, tLocationTrigger, \
     tSurveyNotes, tUpdated, uuid, tShowDist, tHide, phone";

/// Handle to the instances database plus the data root used for instance
/// file cleanup.
#[derive(Clone)]
pub struct InstanceStore {
    db: Database,
    root: PathBuf,
}

impl InstanceStore {
    /// Open or create the instances database under `root/metadata/` and bring
    /// it to the current schema version.
    pub fn open(root: &Path) -> Result<(Self, MigrationOutcome)> {
        std::fs::create_dir_all(paths::instances_dir(root))?;
        let (db, outcome) = Database::open(paths::instances_db_path(root), &Migrator::instances())?;
        let store = Self {
            db,
            root: root.to_path_buf(),
        };
        store.ensure_path_index()?;
        Ok((store, outcome))
    }

    /// In-memory store for testing; `root` is still used for file cleanup.
    pub fn open_in_memory(root: &Path) -> Result<(Self, MigrationOutcome)> {
        let (db, outcome) = Database::open_in_memory(&Migrator::instances())?;
        let store = Self {
            db,
            root: root.to_path_buf(),
        };
        store.ensure_path_index()?;
        Ok((store, outcome))
    }

    /// Wrap an already-migrated database (used by tests that replay the
    /// historical upgrade chain on a hand-built old store).
    pub fn from_database(db: Database, root: &Path) -> Self {
        Self {
            db,
            root: root.to_path_buf(),
        }
    }

    /// One live row per instance file path. Pre-existing stores may already
    /// hold duplicates, in which case the index cannot be built and reads
    /// stay lenient instead.
    fn ensure_path_index(&self) -> Result<()> {
        let result = self.db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE UNIQUE INDEX IF NOT EXISTS instanceFilePathIdx
                 ON instances(instanceFilePath) WHERE deletedDate IS NULL;",
            )
            .map_err(StoreError::from)
        });
        if let Err(err) = result {
            tracing::warn!(%err, "store holds duplicate live file paths; uniqueness not enforced");
        }
        Ok(())
    }

    pub fn data_root(&self) -> &Path {
        &self.root
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn get(&self, id: i64) -> Result<Instance> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {ALL_COLUMNS} FROM instances WHERE _id = ?1"),
                params![id],
                parse_instance_row,
            )
            .optional()
            .map_err(StoreError::from)?
            .ok_or(StoreError::InstanceNotFound(id))
        })
    }

    /// Look an instance up by its file path.
    ///
    /// Duplicate live rows for one path are a store inconsistency; the lowest
    /// row id wins and the condition is logged rather than failing the read.
    pub fn get_by_path(&self, instance_file_path: &str) -> Result<Option<Instance>> {
        let matches = self.query(
            "WHERE instanceFilePath = ?1 AND deletedDate IS NULL ORDER BY _id",
            params![instance_file_path],
        )?;
        if matches.len() > 1 {
            tracing::warn!(
                path = instance_file_path,
                rows = matches.len(),
                "multiple live instances share one file path; using the oldest"
            );
        }
        Ok(matches.into_iter().next())
    }

    /// Look a task up by its server assignment id within one source.
    ///
    /// After repeat duplication several rows share one assignment id; the
    /// accepted duplicate is the live instance for the slot, so an open row
    /// wins over a closed one and newer rows beat older ones.
    pub fn get_by_assignment_id(&self, source: &str, assignment_id: i64) -> Result<Option<Instance>> {
        let rows = self.query(
            "WHERE source = ?1 AND tTaskId = ?2 AND deletedDate IS NULL ORDER BY _id DESC",
            params![source, assignment_id],
        )?;
        let live = rows
            .iter()
            .find(|r| !r.task_status.is_some_and(|s| s.is_closed()))
            .cloned();
        Ok(live.or_else(|| rows.into_iter().next()))
    }

    pub fn list_all(&self) -> Result<Vec<Instance>> {
        self.query("ORDER BY _id", params![])
    }

    pub fn list_not_deleted(&self) -> Result<Vec<Instance>> {
        self.query("WHERE deletedDate IS NULL ORDER BY _id", params![])
    }

    pub fn list_by_status(&self, statuses: &[InstanceStatus]) -> Result<Vec<Instance>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let tail =
            format!("WHERE status IN ({placeholders}) AND deletedDate IS NULL ORDER BY _id");
        let strings: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
        let args: Vec<&dyn rusqlite::ToSql> =
            strings.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        self.query(&tail, &args)
    }

    pub fn count_by_status(&self, status: InstanceStatus) -> Result<i64> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM instances WHERE status = ?1 AND deletedDate IS NULL",
                params![status.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
        })
    }

    pub fn list_by_form_id(&self, form_id: &str) -> Result<Vec<Instance>> {
        self.query(
            "WHERE jrFormId = ?1 AND deletedDate IS NULL ORDER BY _id",
            params![form_id],
        )
    }

    /// `version` of `None` matches only rows whose version is NULL.
    pub fn list_by_form_id_and_version(
        &self,
        form_id: &str,
        version: Option<&str>,
    ) -> Result<Vec<Instance>> {
        self.query(
            "WHERE jrFormId = ?1 AND jrVersion IS ?2 AND deletedDate IS NULL ORDER BY _id",
            params![form_id, version],
        )
    }

    fn query(&self, tail: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Instance>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {ALL_COLUMNS} FROM instances {tail}"))
                .map_err(StoreError::from)?;
            let rows = stmt
                .query_map(args, parse_instance_row)
                .map_err(StoreError::from)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(StoreError::from)?;
            Ok(rows)
        })
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Insert or update an instance and return the row as stored.
    ///
    /// Applies the lifecycle stamps: a missing status defaults to incomplete,
    /// the last-status-change date is set whenever the status actually
    /// changes, and the finalization date is stamped exactly once, on the
    /// first transition into a finalized status.
    pub fn save(&self, instance: &Instance) -> Result<Instance> {
        let now = now_ms();
        let mut row = instance.clone();
        if row.status.is_none() {
            row.status = Some(InstanceStatus::Incomplete);
        }

        match row.id {
            None => {
                if row.last_status_change_date.is_none() {
                    row.last_status_change_date = Some(now);
                }
                if row.finalization_date.is_none()
                    && row.status.is_some_and(|s| s.is_finalized())
                {
                    row.finalization_date = Some(now);
                }
                let id = self.db.with_conn(|conn| insert_row(conn, &row))?;
                self.get(id)
            }
            Some(id) => {
                let prev = self.get(id)?;
                if prev.status != row.status {
                    row.last_status_change_date = Some(now);
                }
                row.finalization_date = prev.finalization_date.or_else(|| {
                    row.status
                        .is_some_and(|s| s.is_finalized())
                        .then_some(now)
                });
                self.db.with_conn(|conn| update_row(conn, id, &row))?;
                self.get(id)
            }
        }
    }

    /// Soft delete: stamp the tombstone and clear the map geometry, then
    /// remove the instance directory. The row survives as an audit record.
    pub fn delete_with_logging(&self, id: i64) -> Result<Instance> {
        let instance = self.get(id)?;
        let now = now_ms();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE instances SET deletedDate = ?1, geometry = NULL, geometryType = NULL
                 WHERE _id = ?2",
                params![now, id],
            )
            .map_err(StoreError::from)
        })?;
        paths::delete_instance_dir(&self.root, &instance.instance_file_path);
        self.get(id)
    }

    /// Hard delete the row, then its files.
    pub fn delete(&self, id: i64) -> Result<()> {
        let instance = self.get(id)?;
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM instances WHERE _id = ?1", params![id])
                .map_err(StoreError::from)
        })?;
        paths::delete_instance_dir(&self.root, &instance.instance_file_path);
        Ok(())
    }

    /// Hard delete every row, then every instance directory.
    pub fn delete_all(&self) -> Result<usize> {
        let all = self.list_all()?;
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM instances", [])
                .map_err(StoreError::from)
        })?;
        for instance in &all {
            paths::delete_instance_dir(&self.root, &instance.instance_file_path);
        }
        Ok(all.len())
    }

    // -------------------------------------------------------------------------
    // Task lifecycle
    // -------------------------------------------------------------------------

    /// Apply a local operator action to the task status.
    ///
    /// Illegal transitions are refused; server sync bypasses this and may
    /// overwrite any status.
    pub fn set_task_status(
        &self,
        id: i64,
        next: TaskStatus,
        comment: Option<&str>,
    ) -> Result<Instance> {
        let mut instance = self.get(id)?;
        let current = instance
            .task_status
            .ok_or_else(|| StoreError::Integrity(format!("instance {id} is not a task")))?;
        if !current.can_transition_to(next) {
            return Err(StoreError::Integrity(format!(
                "task {id} cannot move from {} to {}",
                current.as_str(),
                next.as_str()
            )));
        }
        instance.task_status = Some(next);
        if let Some(comment) = comment {
            instance.task_comment = Some(comment.to_string());
        }
        instance.is_synced = false;
        self.save(&instance)
    }

    /// Gate for opening a task for form filling.
    ///
    /// Only accepted tasks may be started, and a task carrying a location
    /// trigger may only be started through that trigger. Stamps the actual
    /// start time on first open.
    pub fn start_task(&self, id: i64, via_trigger: bool) -> Result<Instance> {
        let mut instance = self.get(id)?;
        let status = instance
            .task_status
            .ok_or_else(|| StoreError::Integrity(format!("instance {id} is not a task")))?;
        if !can_complete(status, instance.task_type.as_deref().unwrap_or("task")) {
            return Err(StoreError::Integrity(format!(
                "task {id} is {} and cannot be opened",
                status.as_str()
            )));
        }
        if instance
            .location_trigger
            .as_deref()
            .is_some_and(|t| !t.is_empty())
            && !via_trigger
        {
            return Err(StoreError::TriggerRequired(id));
        }
        if instance.act_start.is_none() {
            instance.act_start = Some(now_ms());
            instance = self.save(&instance)?;
        }
        Ok(instance)
    }

    /// Complete a task. For a repeating task a fresh accepted duplicate is
    /// created in the same transaction, so the assignment slot stays open
    /// even if the process dies between the two writes.
    pub fn complete_task(&self, id: i64) -> Result<(Instance, Option<Instance>)> {
        let now = now_ms();
        let original = self.get(id)?;
        let status = original
            .task_status
            .ok_or_else(|| StoreError::Integrity(format!("instance {id} is not a task")))?;
        if !can_complete(status, original.task_type.as_deref().unwrap_or("task")) {
            return Err(StoreError::Integrity(format!(
                "task {id} is {} and cannot be completed",
                status.as_str()
            )));
        }

        let mut done = original.clone();
        done.task_status = Some(TaskStatus::Complete);
        done.status = Some(InstanceStatus::Complete);
        done.last_status_change_date = Some(now);
        done.finalization_date = done.finalization_date.or(Some(now));
        done.act_finish = Some(now);
        done.is_synced = false;

        let duplicate = original.repeat.then(|| {
            let mut dup = original.clone();
            dup.id = None;
            dup.uuid = Some(uuid::Uuid::new_v4().to_string());
            dup.instance_file_path =
                paths::new_instance_path(&self.root, &original.display_name, now)
                    .to_string_lossy()
                    .into_owned();
            dup.status = Some(InstanceStatus::Incomplete);
            dup.task_status = Some(TaskStatus::Accepted);
            dup.last_status_change_date = Some(now);
            dup.finalization_date = None;
            dup.act_start = None;
            dup.act_finish = None;
            dup.is_synced = false;
            dup.updated_count = 0;
            dup
        });

        let dup_id = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(StoreError::from)?;
            update_row(&tx, id, &done)?;
            let dup_id = match &duplicate {
                Some(dup) => Some(insert_row(&tx, dup)?),
                None => None,
            };
            tx.commit().map_err(StoreError::from)?;
            Ok(dup_id)
        })?;

        let stored_dup = dup_id.map(|dup_id| self.get(dup_id)).transpose()?;
        Ok((self.get(id)?, stored_dup))
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn parse_instance_row(row: &Row<'_>) -> rusqlite::Result<Instance> {
    let status: Option<String> = row.get(8)?;
    let task_status: Option<String> = row.get(31)?;
    let is_synced: Option<String> = row.get(29)?;
    Ok(Instance {
        id: Some(row.get(0)?),
        display_name: row.get(1)?,
        submission_uri: row.get(2)?,
        can_edit_when_complete: row.get(3)?,
        can_delete_before_send: row.get(4)?,
        instance_file_path: row.get(5)?,
        form_id: row.get(6)?,
        form_version: row.get(7)?,
        status: status.as_deref().and_then(InstanceStatus::from_str),
        last_status_change_date: row.get(9)?,
        finalization_date: row.get(10)?,
        deleted_date: row.get(11)?,
        geometry: row.get(12)?,
        geometry_type: row.get(13)?,
        edit_of: row.get(14)?,
        edit_number: row.get(15)?,
        source: row.get(16)?,
        form_path: row.get(17)?,
        act_lon: row.get(18)?,
        act_lat: row.get(19)?,
        sched_lon: row.get(20)?,
        sched_lat: row.get(21)?,
        task_title: row.get(22)?,
        task_type: row.get(23)?,
        sched_start: row.get(24)?,
        sched_finish: row.get(25)?,
        act_start: row.get(26)?,
        act_finish: row.get(27)?,
        task_address: row.get(28)?,
        is_synced: is_synced.as_deref() == Some("true"),
        assignment_id: row.get(30)?,
        task_status: task_status.as_deref().and_then(TaskStatus::from_str),
        task_comment: row.get(32)?,
        repeat: row.get::<_, Option<i64>>(33)?.unwrap_or(0) != 0,
        update_id: row.get(34)?,
        location_trigger: row.get(35)?,
        survey_notes: row.get(36)?,
        updated_count: row.get::<_, Option<i64>>(37)?.unwrap_or(0),
        uuid: row.get(38)?,
        show_dist: row.get(39)?,
        hide: row.get::<_, Option<i64>>(40)?.unwrap_or(0) != 0,
        phone: row.get(41)?,
    })
}

fn insert_row(conn: &Connection, i: &Instance) -> Result<i64> {
    let bound = BoundInstance::new(i);
    let binds = bound.params();
    conn.execute(
        "INSERT INTO instances (
            displayName, submissionUri, canEditWhenComplete, canDeleteBeforeSend,
            instanceFilePath, jrFormId, jrVersion, status, date, finalizationDate,
            deletedDate, geometry, geometryType, editOf, editNumber, source,
            formPath, actLon, actLat, schedLon, schedLat, tTitle, tTaskType,
            tSchedStart, tSchedFinish, tActStart, tActFinish, tAddress, tIsSync,
            tTaskId, tAssStatus, tComment, tRepeat, tUpdateId, tLocationTrigger,
            tSurveyNotes, tUpdated, uuid, tShowDist, tHide, phone
         ) VALUES (
            :displayName, :submissionUri, :canEditWhenComplete, :canDeleteBeforeSend,
            :instanceFilePath, :jrFormId, :jrVersion, :status, :date, :finalizationDate,
            :deletedDate, :geometry, :geometryType, :editOf, :editNumber, :source,
            :formPath, :actLon, :actLat, :schedLon, :schedLat, :tTitle, :tTaskType,
            :tSchedStart, :tSchedFinish, :tActStart, :tActFinish, :tAddress, :tIsSync,
            :tTaskId, :tAssStatus, :tComment, :tRepeat, :tUpdateId, :tLocationTrigger,
            :tSurveyNotes, :tUpdated, :uuid, :tShowDist, :tHide, :phone
         )",
        &binds[..],
    )
    .map_err(StoreError::from)?;
    Ok(conn.last_insert_rowid())
}

fn update_row(conn: &Connection, id: i64, i: &Instance) -> Result<()> {
    let bound = BoundInstance::new(i);
    let binds = bound.params();
    let changed = conn
        .execute(
            &format!(
                "UPDATE instances SET
                    displayName = :displayName, submissionUri = :submissionUri,
                    canEditWhenComplete = :canEditWhenComplete,
                    canDeleteBeforeSend = :canDeleteBeforeSend,
                    instanceFilePath = :instanceFilePath, jrFormId = :jrFormId,
                    jrVersion = :jrVersion, status = :status, date = :date,
                    finalizationDate = :finalizationDate, deletedDate = :deletedDate,
                    geometry = :geometry, geometryType = :geometryType,
                    editOf = :editOf, editNumber = :editNumber, source = :source,
                    formPath = :formPath, actLon = :actLon, actLat = :actLat,
                    schedLon = :schedLon, schedLat = :schedLat, tTitle = :tTitle,
                    tTaskType = :tTaskType, tSchedStart = :tSchedStart,
                    tSchedFinish = :tSchedFinish, tActStart = :tActStart,
                    tActFinish = :tActFinish, tAddress = :tAddress,
                    tIsSync = :tIsSync, tTaskId = :tTaskId, tAssStatus = :tAssStatus,
                    tComment = :tComment, tRepeat = :tRepeat, tUpdateId = :tUpdateId,
                    tLocationTrigger = :tLocationTrigger, tSurveyNotes = :tSurveyNotes,
                    tUpdated = :tUpdated, uuid = :uuid, tShowDist = :tShowDist,
                    tHide = :tHide, phone = :phone
                 WHERE _id = {id}"
            ),
            &binds[..],
        )
        .map_err(StoreError::from)?;
    if changed == 0 {
        return Err(StoreError::InstanceNotFound(id));
    }
    Ok(())
}

/// Holds the column encodings that are not stored verbatim on [`Instance`]
/// so the named-parameter slice can borrow them.
struct BoundInstance<'a> {
    i: &'a Instance,
    status: Option<&'static str>,
    task_status: Option<&'static str>,
    is_synced: &'static str,
    repeat: i64,
    hide: i64,
}

impl<'a> BoundInstance<'a> {
    fn new(i: &'a Instance) -> Self {
        Self {
            i,
            status: i.status.map(|s| s.as_str()),
            task_status: i.task_status.map(|s| s.as_str()),
            is_synced: if i.is_synced { "true" } else { "false" },
            repeat: i.repeat as i64,
            hide: i.hide as i64,
        }
    }

    fn params(&self) -> [(&'static str, &dyn rusqlite::ToSql); 41] {
        let i = self.i;
        [
            (":displayName", &i.display_name),
            (":submissionUri", &i.submission_uri),
            (":canEditWhenComplete", &i.can_edit_when_complete),
            (":canDeleteBeforeSend", &i.can_delete_before_send),
            (":instanceFilePath", &i.instance_file_path),
            (":jrFormId", &i.form_id),
            (":jrVersion", &i.form_version),
            (":status", &self.status),
            (":date", &i.last_status_change_date),
            (":finalizationDate", &i.finalization_date),
            (":deletedDate", &i.deleted_date),
            (":geometry", &i.geometry),
            (":geometryType", &i.geometry_type),
            (":editOf", &i.edit_of),
            (":editNumber", &i.edit_number),
            (":source", &i.source),
            (":formPath", &i.form_path),
            (":actLon", &i.act_lon),
            (":actLat", &i.act_lat),
            (":schedLon", &i.sched_lon),
            (":schedLat", &i.sched_lat),
            (":tTitle", &i.task_title),
            (":tTaskType", &i.task_type),
            (":tSchedStart", &i.sched_start),
            (":tSchedFinish", &i.sched_finish),
            (":tActStart", &i.act_start),
            (":tActFinish", &i.act_finish),
            (":tAddress", &i.task_address),
            (":tIsSync", &self.is_synced),
            (":tTaskId", &i.assignment_id),
            (":tAssStatus", &self.task_status),
            (":tComment", &i.task_comment),
            (":tRepeat", &self.repeat),
            (":tUpdateId", &i.update_id),
            (":tLocationTrigger", &i.location_trigger),
            (":tSurveyNotes", &i.survey_notes),
            (":tUpdated", &i.updated_count),
            (":uuid", &i.uuid),
            (":tShowDist", &i.show_dist),
            (":tHide", &self.hide),
            (":phone", &i.phone),
        ]
    }
}
