//! Resolves external stimuli (a scanned NFC tag uid, a geofence id) to a
//! position in the current task list.

use crate::status::TaskStatus;
use crate::types::Instance;
use std::collections::HashMap;

/// Result of resolving an external trigger identifier.
///
/// "Nothing matched" and "nothing is listening" are distinct: the first
/// usually means a stray tag, the second that scanning is pointless and the
/// caller can say so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMatch {
    /// Index of the matching task in the list the index was built from.
    Found(usize),
    NoMatch,
    NoTriggers,
}

/// Exact-match lookup from trigger identifier to task position.
///
/// Built from the authoritative task list after each merge; positions are
/// only valid against the exact list passed to [`build`].
///
/// [`build`]: TriggerIndex::build
pub struct TriggerIndex {
    by_trigger: HashMap<String, usize>,
}

impl TriggerIndex {
    /// Index every accepted task of type "task" that carries a non-empty
    /// location trigger. Rejected and cancelled tasks never participate,
    /// and "case" type assignments are opened directly rather than by
    /// stimulus.
    pub fn build(tasks: &[Instance]) -> Self {
        let mut by_trigger = HashMap::new();
        for (position, task) in tasks.iter().enumerate() {
            if task.task_status != Some(TaskStatus::Accepted) {
                continue;
            }
            if task.task_type.as_deref() != Some("task") {
                continue;
            }
            let Some(trigger) = task.location_trigger.as_deref() else {
                continue;
            };
            if trigger.is_empty() {
                continue;
            }
            // First occurrence wins when two tasks share a trigger id.
            by_trigger.entry(trigger.to_string()).or_insert(position);
        }
        Self { by_trigger }
    }

    pub fn is_empty(&self) -> bool {
        self.by_trigger.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_trigger.len()
    }

    pub fn resolve(&self, external_id: &str) -> TriggerMatch {
        if self.by_trigger.is_empty() {
            return TriggerMatch::NoTriggers;
        }
        match self.by_trigger.get(external_id) {
            Some(&position) => TriggerMatch::Found(position),
            None => TriggerMatch::NoMatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Instance;

    fn task(status: TaskStatus, task_type: &str, trigger: Option<&str>) -> Instance {
        Instance {
            display_name: "t".to_string(),
            instance_file_path: "/tmp/t.xml".to_string(),
            form_id: "f".to_string(),
            assignment_id: Some(1),
            task_status: Some(status),
            task_type: Some(task_type.to_string()),
            location_trigger: trigger.map(str::to_string),
            ..Instance::default()
        }
    }

    #[test]
    fn resolves_accepted_task_by_trigger_id() {
        let tasks = vec![
            task(TaskStatus::Accepted, "task", None),
            task(TaskStatus::Accepted, "task", Some("tag-42")),
        ];
        let index = TriggerIndex::build(&tasks);
        assert_eq!(index.resolve("tag-42"), TriggerMatch::Found(1));
        assert_eq!(index.resolve("unknown"), TriggerMatch::NoMatch);
    }

    #[test]
    fn empty_index_reports_no_triggers() {
        let tasks = vec![task(TaskStatus::Accepted, "task", None)];
        let index = TriggerIndex::build(&tasks);
        assert!(index.is_empty());
        assert_eq!(index.resolve("tag-42"), TriggerMatch::NoTriggers);
    }

    #[test]
    fn closed_and_non_task_entries_are_not_indexed() {
        let tasks = vec![
            task(TaskStatus::Rejected, "task", Some("tag-1")),
            task(TaskStatus::Cancelled, "task", Some("tag-2")),
            task(TaskStatus::Accepted, "case", Some("tag-3")),
            task(TaskStatus::Accepted, "task", Some("")),
        ];
        let index = TriggerIndex::build(&tasks);
        assert!(index.is_empty());
    }

    #[test]
    fn first_occurrence_wins_for_duplicate_triggers() {
        let tasks = vec![
            task(TaskStatus::Accepted, "task", Some("tag-9")),
            task(TaskStatus::Accepted, "task", Some("tag-9")),
        ];
        let index = TriggerIndex::build(&tasks);
        assert_eq!(index.resolve("tag-9"), TriggerMatch::Found(0));
        assert_eq!(index.len(), 1);
    }
}
