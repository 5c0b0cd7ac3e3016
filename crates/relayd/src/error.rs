use relay_agents::ProcessError;
use relay_core::{TaskId, TaskStatus};
use relay_git::GitError;

use crate::gate::GateError;
use crate::github::GitHubError;
use crate::state_machine::StateMachineError;
use crate::store::StoreError;

/// Why one execution attempt of a task ended without completing.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    GitHub(#[from] GitHubError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Admission(#[from] GateError),
    #[error("task was cancelled")]
    Cancelled,
}

impl ExecutionError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            ExecutionError::Cancelled => true,
            ExecutionError::Process(err) => err.is_cancelled(),
            ExecutionError::Git(GitError::Cancelled { .. }) => true,
            ExecutionError::Admission(GateError::Abandoned) => true,
            _ => false,
        }
    }

    /// Timeouts and transient push failures may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ExecutionError::Process(err) => err.is_timeout(),
            ExecutionError::Git(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Rejections of operator requests against the task lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("task not found: {task_id}")]
    NotFound { task_id: TaskId },
    #[error("task {task_id} is {status} and cannot be cancelled")]
    NotCancellable { task_id: TaskId, status: TaskStatus },
    #[error("task {task_id} is {status}; only failed tasks can be retried")]
    NotRetryable { task_id: TaskId, status: TaskStatus },
    #[error("task {task_id} has used all {max_retries} retries")]
    RetryExhausted {
        task_id: TaskId,
        retry_count: u32,
        max_retries: u32,
    },
    #[error("task engine is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Transition(#[from] StateMachineError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { task_id } => LifecycleError::NotFound { task_id },
            other => LifecycleError::Store(other),
        }
    }
}
