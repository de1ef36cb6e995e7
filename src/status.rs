//! Status state machines for instances and server-issued tasks.

use serde::{Deserialize, Serialize};

/// Generic form-submission lifecycle of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstanceStatus {
    Incomplete,
    Complete,
    Submitted,
    SubmissionFailed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Incomplete => "incomplete",
            InstanceStatus::Complete => "complete",
            InstanceStatus::Submitted => "submitted",
            InstanceStatus::SubmissionFailed => "submissionFailed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "incomplete" => Some(InstanceStatus::Incomplete),
            "complete" => Some(InstanceStatus::Complete),
            "submitted" => Some(InstanceStatus::Submitted),
            "submissionFailed" => Some(InstanceStatus::SubmissionFailed),
            _ => None,
        }
    }

    /// Terminal generic statuses get a finalization date stamped exactly once.
    pub fn is_finalized(&self) -> bool {
        !matches!(self, InstanceStatus::Incomplete)
    }
}

/// Status of a server-issued assignment.
///
/// `NEW -> ACCEPTED -> (COMPLETE | REJECTED | CANCELLED)`, plus
/// `ACCEPTED -> SUBMITTED` when uploaded without a terminal client-side edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    New,
    Accepted,
    Complete,
    Rejected,
    Cancelled,
    Submitted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::Accepted => "accepted",
            TaskStatus::Complete => "complete",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Submitted => "submitted",
        }
    }

    /// Parse a status string from the server or the store.
    ///
    /// Servers report self-assigned tasks awaiting approval as "pending";
    /// locally those behave like NEW (not yet completable).
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" | "pending" => Some(TaskStatus::New),
            "accepted" => Some(TaskStatus::Accepted),
            "complete" => Some(TaskStatus::Complete),
            "rejected" => Some(TaskStatus::Rejected),
            "cancelled" => Some(TaskStatus::Cancelled),
            "submitted" => Some(TaskStatus::Submitted),
            _ => None,
        }
    }

    /// Closed for editing: no further form filling against this assignment.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete
                | TaskStatus::Submitted
                | TaskStatus::Rejected
                | TaskStatus::Cancelled
        )
    }

    /// Rejected and cancelled tasks never participate in trigger matching.
    pub fn excluded_from_triggers(&self) -> bool {
        matches!(self, TaskStatus::Rejected | TaskStatus::Cancelled)
    }

    /// Whether moving to `next` is a legal client-side transition.
    ///
    /// Server payloads may still override a closed status (e.g. re-open a
    /// cancelled task); this predicate governs local operator actions only.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::New => matches!(next, TaskStatus::Accepted | TaskStatus::Rejected),
            TaskStatus::Accepted => matches!(
                next,
                TaskStatus::Complete
                    | TaskStatus::Rejected
                    | TaskStatus::Cancelled
                    | TaskStatus::Submitted
            ),
            _ => false,
        }
    }
}

/// Whether a task may be opened for form filling.
///
/// Only ACCEPTED tasks are completable; "case" type assignments follow the
/// same rule. Self-assigned tasks still pending approval parse as NEW and are
/// therefore refused here.
pub fn can_complete(status: TaskStatus, _task_type: &str) -> bool {
    status == TaskStatus::Accepted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_task_is_completable() {
        assert!(can_complete(TaskStatus::Accepted, "task"));
        assert!(can_complete(TaskStatus::Accepted, "case"));
    }

    #[test]
    fn closed_or_pending_tasks_are_not_completable() {
        assert!(!can_complete(TaskStatus::Submitted, "task"));
        assert!(!can_complete(TaskStatus::Complete, "task"));
        assert!(!can_complete(TaskStatus::New, "task"));
        assert!(!can_complete(TaskStatus::from_str("pending").unwrap(), "task"));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::New,
            TaskStatus::Accepted,
            TaskStatus::Complete,
            TaskStatus::Rejected,
            TaskStatus::Cancelled,
            TaskStatus::Submitted,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_str("bogus"), None);
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        assert!(TaskStatus::New.can_transition_to(TaskStatus::Accepted));
        assert!(TaskStatus::Accepted.can_transition_to(TaskStatus::Complete));
        assert!(TaskStatus::Accepted.can_transition_to(TaskStatus::Submitted));
        assert!(TaskStatus::Accepted.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Complete.can_transition_to(TaskStatus::Accepted));
        assert!(!TaskStatus::Submitted.can_transition_to(TaskStatus::Complete));
        assert!(!TaskStatus::New.can_transition_to(TaskStatus::Complete));
    }

    #[test]
    fn rejected_and_cancelled_are_excluded_from_triggers() {
        assert!(TaskStatus::Rejected.excluded_from_triggers());
        assert!(TaskStatus::Cancelled.excluded_from_triggers());
        assert!(!TaskStatus::Accepted.excluded_from_triggers());
        assert!(!TaskStatus::Submitted.excluded_from_triggers());
    }

    #[test]
    fn finalized_instance_statuses() {
        assert!(!InstanceStatus::Incomplete.is_finalized());
        assert!(InstanceStatus::Complete.is_finalized());
        assert!(InstanceStatus::Submitted.is_finalized());
        assert!(InstanceStatus::SubmissionFailed.is_finalized());
    }
}
