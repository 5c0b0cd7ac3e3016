use std::path::PathBuf;
use std::time::Duration;

use relay_core::{IssueRef, TaskId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommand {
    pub executable: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// What an adapter needs to know to start work on one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    pub task_id: TaskId,
    pub issue: IssueRef,
    pub branch_name: String,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub task_id: TaskId,
    pub working_dir: PathBuf,
    pub command: AgentCommand,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
    pub timeout: Duration,
    /// How long a cancelled process gets between SIGTERM and SIGKILL.
    pub grace_period: Duration,
    /// Lines of each stream kept for the outcome.
    pub tail_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout_tail: Vec<String>,
    pub stderr_tail: Vec<String>,
    pub duration: Duration,
}

impl RunOutcome {
    pub fn stdout_text(&self) -> String {
        self.stdout_tail.join("\n")
    }

    pub fn stderr_text(&self) -> String {
        self.stderr_tail.join("\n")
    }

    /// Turn a non-zero exit into [`crate::ProcessError::Failure`].
    pub fn into_result(self) -> Result<Self, crate::ProcessError> {
        if self.success {
            Ok(self)
        } else {
            Err(crate::ProcessError::Failure {
                exit_code: self.exit_code,
                stderr: self.stderr_text(),
            })
        }
    }
}
