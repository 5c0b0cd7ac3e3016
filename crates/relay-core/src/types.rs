//! Core records shared by the engine, the store and the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::state::TaskStatus;

static TASK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh id for work on `issue_number`.
    ///
    /// Ids embed the issue and creation time for readability; a process-wide
    /// counter keeps ids unique when two tasks are minted in the same
    /// millisecond.
    pub fn generate(issue_number: u64, at: DateTime<Utc>) -> Self {
        let seq = TASK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "task-{issue_number}-{}-{seq}",
            at.timestamp_millis()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The issue a task was triggered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub html_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub issue: IssueRef,
    pub branch_name: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Wall-clock seconds of the last attempt, set when it finishes.
    pub execution_secs: Option<f64>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    /// Short human note about an unusual but successful outcome.
    pub note: Option<String>,
    pub pull_request: Option<PullRequestRef>,
    pub development_summary: Option<String>,
}

impl Task {
    pub fn new(
        id: TaskId,
        issue: IssueRef,
        branch_name: String,
        max_retries: u32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            issue,
            branch_name,
            status: TaskStatus::Pending,
            created_at: at,
            started_at: None,
            completed_at: None,
            updated_at: at,
            execution_secs: None,
            retry_count: 0,
            max_retries,
            success: None,
            error_message: None,
            note: None,
            pull_request: None,
            development_summary: None,
        }
    }

    pub fn issue_number(&self) -> u64 {
        self.issue.number
    }

    pub fn retries_left(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("invalid log level '{other}'")),
        }
    }
}

/// One line of a task's append-only log.
///
/// `seq` is assigned by the store and orders entries within a task; entries
/// that have not been persisted yet carry `0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub task_id: TaskId,
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(task_id: TaskId, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            task_id,
            seq: 0,
            at: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: u64,
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl TaskStats {
    pub fn record(&mut self, status: TaskStatus, count: u64) {
        self.total += count;
        match status {
            TaskStatus::Pending => self.pending += count,
            TaskStatus::Running => self.running += count,
            TaskStatus::Completed => self.completed += count,
            TaskStatus::Failed => self.failed += count,
            TaskStatus::Cancelled => self.cancelled += count,
        }
    }
}
