use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("invalid run request: {message}")]
    InvalidRequest { message: String },
    #[error("agent spawn failed ({executable}): {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("agent runtime error: {message}")]
    Runtime { message: String },
    #[error("agent process timed out after {after:?}")]
    Timeout { after: Duration, stderr_tail: String },
    #[error("agent process cancelled")]
    Cancelled,
    #[error("agent process exited with status {exit_code:?}: {stderr}")]
    Failure {
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled)
    }
}
