//! Task merge engine: reconciles the server's assignment list against the
//! local instance store.
//!
//! The store is never touched while network I/O is outstanding; all writes
//! happen after the fetch returns, one bounded transaction per record. A
//! record that matches its stored counterpart exactly is skipped, so a
//! repeated sync with an unchanged payload mutates nothing.

use crate::db::InstanceStore;
use crate::error::{Result, TransportError};
use crate::paths;
use crate::status::TaskStatus;
use crate::types::{Instance, SyncOutcome, TaskRecord};
use std::collections::HashSet;
use std::sync::Mutex;

/// External collaborator that fetches the current assignment list for one
/// server identity.
pub trait TaskListClient {
    fn fetch_tasks(&self) -> std::result::Result<Vec<TaskRecord>, TransportError>;
}

pub struct SyncEngine {
    store: InstanceStore,
    in_flight: Mutex<HashSet<String>>,
}

impl SyncEngine {
    pub fn new(store: InstanceStore) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Fetch the assignment list for `source` and merge it into the store.
    ///
    /// At most one sync per source runs at a time; a second caller gets an
    /// `already_running` outcome and the store is not touched. Transport
    /// failures are reported in the outcome's error map, never as `Err`, so
    /// a background timer and a manual refresh handle them identically.
    pub fn sync(
        &self,
        source: &str,
        client: &dyn TaskListClient,
        manual: bool,
    ) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::default();

        let _guard = match InFlightGuard::acquire(&self.in_flight, source) {
            Some(guard) => guard,
            None => {
                tracing::info!(source, "sync already in flight; skipping");
                outcome.already_running = true;
                return Ok(outcome);
            }
        };

        tracing::info!(source, manual, "fetching task list");
        let records = match client.fetch_tasks() {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(source, %err, "task list fetch failed");
                outcome.errors.insert(err.key().to_string(), err.to_string());
                return Ok(outcome);
            }
        };

        if records.is_empty() {
            // An empty assignment list is a success; the key exists so the
            // caller can distinguish "nothing assigned" from "nothing new",
            // but it is suppressed from user-visible rendering.
            outcome
                .errors
                .insert(SyncOutcome::NO_TASKS_KEY.to_string(), "no tasks".to_string());
            return Ok(outcome);
        }

        for record in &records {
            match self.merge_record(source, record) {
                Ok(MergeAction::Added) => outcome.added += 1,
                Ok(MergeAction::Updated) => outcome.updated += 1,
                Ok(MergeAction::Unchanged) => outcome.unchanged += 1,
                Err(err) => {
                    tracing::warn!(source, assignment = record.assignment_id, %err, "task merge failed");
                    outcome.errors.insert(
                        format!("err_task_{}", record.assignment_id),
                        err.to_string(),
                    );
                }
            }
        }

        tracing::info!(
            source,
            added = outcome.added,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            "task list merged"
        );
        Ok(outcome)
    }

    /// Upsert one server record keyed by assignment id.
    ///
    /// Tasks absent from the payload are never touched here; cancellation
    /// only happens when the server sends an explicit cancelled status.
    fn merge_record(&self, source: &str, record: &TaskRecord) -> Result<MergeAction> {
        match self.store.get_by_assignment_id(source, record.assignment_id)? {
            None => {
                // A closed assignment we never held locally carries nothing
                // worth materializing.
                if record.status.is_closed() {
                    return Ok(MergeAction::Unchanged);
                }
                self.store
                    .save(&self.instance_from_record(source, record))?;
                Ok(MergeAction::Added)
            }
            Some(existing) => {
                let merged = apply_record(&existing, record);
                if merged == existing {
                    return Ok(MergeAction::Unchanged);
                }
                self.store.save(&merged)?;
                Ok(MergeAction::Updated)
            }
        }
    }

    fn instance_from_record(&self, source: &str, record: &TaskRecord) -> Instance {
        let now = crate::db::now_ms();
        Instance {
            display_name: record.title.clone(),
            instance_file_path: paths::new_instance_path(
                self.store.data_root(),
                &record.title,
                now,
            )
            .to_string_lossy()
            .into_owned(),
            form_id: record.form_id.clone(),
            form_version: record.form_version.clone(),
            source: Some(source.to_string()),
            task_title: Some(record.title.clone()),
            task_type: Some(record.task_type.clone()),
            sched_start: record.sched_start,
            sched_finish: record.sched_finish,
            sched_lat: record.sched_lat,
            sched_lon: record.sched_lon,
            task_address: record.address.clone(),
            is_synced: true,
            assignment_id: Some(record.assignment_id),
            task_status: Some(record.status),
            repeat: record.repeat,
            update_id: record.update_id.clone(),
            location_trigger: record.location_trigger.clone(),
            uuid: Some(
                record
                    .uuid
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            ),
            show_dist: record.show_dist,
            phone: record.phone.clone(),
            ..Instance::default()
        }
    }
}

enum MergeAction {
    Added,
    Updated,
    Unchanged,
}

/// Overlay the server-owned fields of a record onto an existing instance,
/// preserving everything local (survey notes, edit lineage, actuals,
/// comments, file path).
fn apply_record(existing: &Instance, record: &TaskRecord) -> Instance {
    let mut merged = existing.clone();
    merged.task_title = Some(record.title.clone());
    merged.display_name = record.title.clone();
    merged.task_type = Some(record.task_type.clone());
    merged.form_id = record.form_id.clone();
    merged.form_version = record.form_version.clone();
    merged.sched_start = record.sched_start;
    merged.sched_finish = record.sched_finish;
    merged.sched_lat = record.sched_lat;
    merged.sched_lon = record.sched_lon;
    merged.task_address = record.address.clone();
    merged.repeat = record.repeat;
    merged.update_id = record.update_id.clone();
    merged.location_trigger = record.location_trigger.clone();
    merged.show_dist = record.show_dist;
    merged.phone = record.phone.clone();

    // The server may re-open or cancel an assignment at will; local edits in
    // progress are only preserved when the stored status is further along
    // than what the server reports.
    if !status_is_further_along(existing.task_status, record.status) {
        merged.task_status = Some(record.status);
    }
    merged
}

/// Whether the locally stored status already reflects work the server has
/// not yet acknowledged (completed or submitted locally).
fn status_is_further_along(local: Option<TaskStatus>, remote: TaskStatus) -> bool {
    matches!(
        local,
        Some(TaskStatus::Complete) | Some(TaskStatus::Submitted)
    ) && matches!(remote, TaskStatus::Accepted | TaskStatus::New)
}

/// Removes the source from the in-flight set on drop, so a panicking sync
/// never wedges the guard.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    source: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, source: &str) -> Option<Self> {
        let mut in_flight = set.lock().unwrap();
        if !in_flight.insert(source.to_string()) {
            return None;
        }
        Some(Self {
            set,
            source: source.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.source);
    }
}
