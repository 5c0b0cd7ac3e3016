//! Task status tags and the predicates the lifecycle relies on.

use serde::{Deserialize, Serialize};

/// Where a task sits in its lifecycle.
///
/// `Pending` and `Running` are the only non-terminal states. A failed task may
/// be moved back to `Pending` by a retry; nothing leaves `Completed` or
/// `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for a concurrency slot.
    Pending,
    /// Holding a slot; the agent or git automation is working.
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Cancellation is accepted for any task that has not finished yet.
    pub fn can_cancel(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_retry(self) -> bool {
        matches!(self, TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            other => Err(format!(
                "invalid task status '{other}'. valid values: pending, running, completed, failed, cancelled"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_serializes_as_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Cancelled).expect("serialize");
        assert_eq!(json, "\"cancelled\"");

        let decoded: TaskStatus = serde_json::from_str("\"running\"").expect("deserialize");
        assert_eq!(decoded, TaskStatus::Running);
    }

    #[test]
    fn only_pending_and_running_are_non_terminal() {
        let open: Vec<_> = TaskStatus::ALL
            .into_iter()
            .filter(|status| !status.is_terminal())
            .collect();
        assert_eq!(open, vec![TaskStatus::Pending, TaskStatus::Running]);
    }

    #[test]
    fn cancel_and_retry_predicates_follow_the_lifecycle() {
        assert!(TaskStatus::Pending.can_cancel());
        assert!(TaskStatus::Running.can_cancel());
        assert!(!TaskStatus::Completed.can_cancel());
        assert!(!TaskStatus::Cancelled.can_cancel());

        assert!(TaskStatus::Failed.can_retry());
        assert!(!TaskStatus::Cancelled.can_retry());
        assert!(!TaskStatus::Completed.can_retry());
    }

    #[test]
    fn parse_accepts_both_spellings_of_cancelled() {
        assert_eq!(
            "canceled".parse::<TaskStatus>().expect("parse"),
            TaskStatus::Cancelled
        );
        assert_eq!(
            " FAILED ".parse::<TaskStatus>().expect("parse"),
            TaskStatus::Failed
        );
        let err = "done".parse::<TaskStatus>().expect_err("unknown status");
        assert!(err.contains("invalid task status 'done'"));
    }
}
