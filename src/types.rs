//! Core types for the field task store.

use crate::status::{InstanceStatus, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One persisted attempt at filling a form.
///
/// The generic fields track the form-submission lifecycle; the task extension
/// fields are populated only when the instance originates from a server-issued
/// assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Store-assigned row id; `None` until first saved.
    pub id: Option<i64>,
    pub display_name: String,
    pub submission_uri: Option<String>,
    pub can_edit_when_complete: Option<String>,
    pub can_delete_before_send: Option<String>,
    /// Logical external identifier; unique per non-deleted row.
    pub instance_file_path: String,
    pub form_id: String,
    pub form_version: Option<String>,
    pub status: Option<InstanceStatus>,
    pub last_status_change_date: Option<i64>,
    /// Set exactly once, on the transition into a terminal generic status.
    pub finalization_date: Option<i64>,
    /// Tombstone timestamp; a set value means logically deleted.
    pub deleted_date: Option<i64>,
    pub geometry: Option<String>,
    pub geometry_type: Option<String>,
    /// Row id of the instance this one edits; never equal to own id.
    pub edit_of: Option<i64>,
    /// Present iff `edit_of` is present.
    pub edit_number: Option<i64>,

    // Task extension fields
    /// Originating server identity; hard partition key.
    pub source: Option<String>,
    pub form_path: Option<String>,
    pub act_lon: Option<f64>,
    pub act_lat: Option<f64>,
    pub sched_lon: Option<f64>,
    pub sched_lat: Option<f64>,
    pub task_title: Option<String>,
    /// "task" or "case".
    pub task_type: Option<String>,
    pub sched_start: Option<i64>,
    pub sched_finish: Option<i64>,
    pub act_start: Option<i64>,
    pub act_finish: Option<i64>,
    pub task_address: Option<String>,
    pub is_synced: bool,
    /// Server-side assignment id.
    pub assignment_id: Option<i64>,
    pub task_status: Option<TaskStatus>,
    pub task_comment: Option<String>,
    /// Completing a repeat task spawns a duplicate instance instead of
    /// closing the slot.
    pub repeat: bool,
    pub update_id: Option<String>,
    /// Non-empty means the task may only be opened via a matching external
    /// trigger (NFC tag uid or geofence id).
    pub location_trigger: Option<String>,
    pub survey_notes: Option<String>,
    pub updated_count: i64,
    pub uuid: Option<String>,
    /// Distance in metres at which the task is shown; 0 for always.
    pub show_dist: Option<i64>,
    pub hide: bool,
    pub phone: Option<String>,
}

impl Instance {
    pub fn is_deleted(&self) -> bool {
        self.deleted_date.is_some()
    }

    /// Whether this instance wraps a server-issued task.
    pub fn is_task(&self) -> bool {
        self.assignment_id.is_some()
    }
}

/// One appended point of the GPS trail, partitioned by source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracePoint {
    pub id: i64,
    pub source: Option<String>,
    pub lat: f64,
    pub lon: f64,
    /// Milliseconds since the epoch.
    pub time: i64,
}

/// A task record as parsed from the server's assignment list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub assignment_id: i64,
    pub form_id: String,
    pub form_version: Option<String>,
    pub title: String,
    /// "task" or "case".
    #[serde(default = "default_task_type")]
    pub task_type: String,
    pub status: TaskStatus,
    pub sched_start: Option<i64>,
    pub sched_finish: Option<i64>,
    pub sched_lat: Option<f64>,
    pub sched_lon: Option<f64>,
    pub address: Option<String>,
    #[serde(default)]
    pub repeat: bool,
    pub location_trigger: Option<String>,
    pub update_id: Option<String>,
    pub show_dist: Option<i64>,
    pub uuid: Option<String>,
    pub phone: Option<String>,
}

fn default_task_type() -> String {
    "task".to_string()
}

/// Aggregated result of one task-list sync.
///
/// Multiple error keys may be present in one call; `err_no_tasks` is always
/// suppressed from user-visible rendering because an empty assignment list is
/// a success, not a failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Set when another sync for the same source was already in flight; the
    /// store was not touched.
    pub already_running: bool,
    pub errors: BTreeMap<String, String>,
}

impl SyncOutcome {
    pub const NO_TASKS_KEY: &'static str = "err_no_tasks";

    /// True when nothing went wrong that the user needs to see.
    pub fn is_success(&self) -> bool {
        self.user_visible_errors().next().is_none()
    }

    /// Error entries the caller should render; "no tasks" never appears.
    pub fn user_visible_errors(&self) -> impl Iterator<Item = (&String, &String)> {
        self.errors
            .iter()
            .filter(|(key, _)| key.as_str() != Self::NO_TASKS_KEY)
    }
}
