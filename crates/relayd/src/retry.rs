//! Retry policy: decides whether a failed attempt is re-queued automatically.

use std::time::Duration;

use relay_core::Task;

use crate::error::ExecutionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub auto_retry: bool,
    pub delay: Duration,
}

/// Decision returned by the retry evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    /// Human-readable explanation.
    pub reason: String,
}

impl RetryDecision {
    fn no(reason: impl Into<String>) -> Self {
        Self {
            should_retry: false,
            reason: reason.into(),
        }
    }
}

/// Evaluate whether a task should be retried after a failed attempt.
///
/// Only timeouts and transient push failures qualify; cancellations,
/// conflicts, branch errors and agent failures need a human.
pub fn evaluate_retry(task: &Task, failure: &ExecutionError, policy: &RetryPolicy) -> RetryDecision {
    if failure.is_cancelled() {
        return RetryDecision::no("task was cancelled");
    }

    if !failure.is_transient() {
        return RetryDecision::no("failure is not transient");
    }

    if !policy.auto_retry {
        return RetryDecision::no("automatic retry is disabled");
    }

    if task.retry_count >= task.max_retries {
        return RetryDecision::no(format!("max retries ({}) exhausted", task.max_retries));
    }

    RetryDecision {
        should_retry: true,
        reason: format!(
            "retrying (attempt {}/{}) in {}s",
            task.retry_count + 1,
            task.max_retries,
            policy.delay.as_secs()
        ),
    }
}
