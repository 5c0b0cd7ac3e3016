//! Allowed task status transitions.

use chrono::{DateTime, Utc};
use relay_core::{Task, TaskStatus};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("invalid task status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

/// Move a task to `to`, stamping the lifecycle timestamps.
///
/// Entering `Running` sets `started_at`. Entering a terminal status sets
/// `completed_at` and `execution_secs`. Going back to `Pending` clears the
/// previous attempt's outcome.
pub fn transition_task(
    task: &mut Task,
    to: TaskStatus,
    at: DateTime<Utc>,
) -> Result<StatusTransition, StateMachineError> {
    let from = task.status;
    if !is_transition_allowed(from, to) {
        return Err(StateMachineError::InvalidTransition { from, to });
    }

    task.status = to;
    task.updated_at = at;
    match to {
        TaskStatus::Pending => {
            task.started_at = None;
            task.completed_at = None;
            task.execution_secs = None;
            task.success = None;
            task.error_message = None;
            task.note = None;
        }
        TaskStatus::Running => {
            task.started_at = Some(at);
        }
        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
            task.completed_at = Some(at);
            task.success = Some(to == TaskStatus::Completed);
            task.execution_secs = task
                .started_at
                .map(|started| (at - started).num_milliseconds().max(0) as f64 / 1000.0);
        }
    }

    Ok(StatusTransition { from, to, at })
}

/// Check if a status transition is valid.
///
/// ```text
/// Pending → Running → Completed
///    │         ├──→ Failed ──→ Pending (retry)
///    │         └──→ Cancelled
///    ├──→ Cancelled
///    └──→ Failed (interrupted before admission)
/// ```
pub fn is_transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    matches!(
        (from, to),
        (Pending, Running)
            | (Pending, Cancelled)
            | (Pending, Failed)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Failed, Pending)
    )
}
