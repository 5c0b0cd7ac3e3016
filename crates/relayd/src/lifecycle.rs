//! Task lifecycle: creation, admission, execution, finalization and retry.
//!
//! A single dispatcher consumes queued task ids in creation order and waits
//! on the [`ConcurrencyGate`] for each one before spawning its execution.
//! Every status change goes through [`TaskStore::modify_task`], so a cancel
//! request and an execution finalizer never interleave. Each attempt owns a
//! [`CancellationToken`] that reaches the gate, the agent process and the
//! push.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use relay_agents::{
    extract_development_summary, AgentAdapter, AgentInvocation, OutputSink, ProcessSupervisor,
    RunRequest,
};
use relay_core::{
    render_commit_message, IssueRef, LogEntry, PullRequestRef, RelayConfig, Task, TaskId,
    TaskStats, TaskStatus,
};
use relay_git::{BranchPreparation, CommitOutcome, GitAutomation};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::broadcaster::{LogBroadcaster, LogEvent};
use crate::error::{ExecutionError, LifecycleError};
use crate::gate::{ConcurrencyGate, ConcurrencySlot, ConcurrencyStats, GateError};
use crate::github::{build_pr_body, GitHubApi, GitHubError, PullRequestDraft, PullRequestSummary};
use crate::journal::TaskJournal;
use crate::retry::{evaluate_retry, RetryDecision, RetryPolicy};
use crate::state_machine::transition_task;
use crate::store::{StoreError, TaskQuery, TaskStore};

pub const NO_CHANGES_NOTE: &str = "no changes produced by agent";
pub const LATE_CANCEL_NOTE: &str =
    "cancellation arrived while the pull request was being opened; the task completes with it";
const INTERRUPTED_MESSAGE: &str = "interrupted: relayd stopped before the task finished";
const SHUTDOWN_SETTLE_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub max_retries: u32,
    pub retry: RetryPolicy,
    pub agent_timeout: Duration,
    pub grace_period: Duration,
    pub output_tail_lines: usize,
    pub commit_template: String,
}

impl LifecycleSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        let engine = config.engine_settings();
        Self {
            max_retries: engine.max_retries,
            retry: RetryPolicy {
                auto_retry: config.tasks.auto_retry,
                delay: Duration::from_secs(config.tasks.retry_delay_secs),
            },
            agent_timeout: engine.timeout,
            grace_period: Duration::from_secs(config.agent.grace_period_secs),
            output_tail_lines: config.agent.output_tail_lines,
            commit_template: config.repository.commit_template.clone(),
        }
    }
}

/// Everything the manager drives, constructed by the caller.
pub struct LifecycleParts {
    pub store: Arc<TaskStore>,
    pub gate: ConcurrencyGate,
    pub broadcaster: Arc<LogBroadcaster>,
    pub git: GitAutomation,
    pub github: Arc<dyn GitHubApi>,
    pub adapter: Arc<dyn AgentAdapter>,
    pub settings: LifecycleSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub logs: Vec<LogEntry>,
}

/// A log subscription ready to be streamed.
///
/// `live` is `None` when the task was already terminal: `backlog` then holds
/// its full stored log and `finished` its status.
#[derive(Debug)]
pub struct LogStream {
    pub backlog: Vec<LogEntry>,
    pub finished: Option<TaskStatus>,
    pub live: Option<broadcast::Receiver<LogEvent>>,
}

#[derive(Debug)]
enum Delivery {
    PullRequest(PullRequestRef),
    NoChanges,
}

#[derive(Debug)]
enum Settled {
    Completed(Task),
    Cancelled(Task),
    Failed { task: Task, retry: RetryDecision },
    Interrupted,
}

/// Cancellation token of the queued or running attempt of each task.
///
/// Every arming gets a fresh attempt number, so an attempt that finishes
/// only releases its own token and never one a retry armed since.
#[derive(Debug, Default)]
struct AttemptTokens {
    next: u64,
    armed: HashMap<TaskId, ArmedAttempt>,
}

#[derive(Debug, Clone)]
struct ArmedAttempt {
    attempt: u64,
    token: CancellationToken,
}

impl AttemptTokens {
    fn arm(&mut self, task_id: &TaskId, token: CancellationToken) -> u64 {
        self.next += 1;
        let attempt = self.next;
        self.armed
            .insert(task_id.clone(), ArmedAttempt { attempt, token });
        attempt
    }

    fn get(&self, task_id: &TaskId) -> Option<ArmedAttempt> {
        self.armed.get(task_id).cloned()
    }

    /// Drop the token only if `attempt` is still the armed one.
    fn release(&mut self, task_id: &TaskId, attempt: u64) -> bool {
        match self.armed.get(task_id) {
            Some(armed) if armed.attempt == attempt => {
                self.armed.remove(task_id);
                true
            }
            _ => false,
        }
    }

    fn remove(&mut self, task_id: &TaskId) {
        self.armed.remove(task_id);
    }
}

#[derive(Clone)]
pub struct TaskLifecycleManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<TaskStore>,
    gate: ConcurrencyGate,
    broadcaster: Arc<LogBroadcaster>,
    journal: TaskJournal,
    git: GitAutomation,
    github: Arc<dyn GitHubApi>,
    adapter: Arc<dyn AgentAdapter>,
    supervisor: ProcessSupervisor,
    settings: LifecycleSettings,
    queue: mpsc::UnboundedSender<TaskId>,
    tokens: Mutex<AttemptTokens>,
    /// Serializes branch allocation and task creation.
    creating: Mutex<()>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl TaskLifecycleManager {
    /// Recover interrupted tasks and start the dispatcher.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start(parts: LifecycleParts) -> Result<Self, LifecycleError> {
        let (queue, receiver) = mpsc::unbounded_channel();
        let journal = TaskJournal::new(Arc::clone(&parts.store), Arc::clone(&parts.broadcaster));
        let inner = Arc::new(Inner {
            store: parts.store,
            gate: parts.gate,
            broadcaster: parts.broadcaster,
            journal,
            git: parts.git,
            github: parts.github,
            adapter: parts.adapter,
            supervisor: ProcessSupervisor::new(),
            settings: parts.settings,
            queue,
            tokens: Mutex::new(AttemptTokens::default()),
            creating: Mutex::new(()),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        });

        let recovered = inner.recover_interrupted()?;
        if recovered > 0 {
            tracing::warn!(recovered, "marked tasks interrupted by a previous run as failed");
        }

        tokio::spawn(dispatch(Arc::clone(&inner), receiver));
        Ok(Self { inner })
    }

    /// Create a pending task for `issue` and queue it for admission.
    pub fn submit(&self, issue: IssueRef) -> Result<Task, LifecycleError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(LifecycleError::ShuttingDown);
        }

        let _creating = inner.creating.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let mut branch_at = now;
        let mut branch_name = inner.git.branch_name(issue.number, branch_at);
        while inner.store.branch_name_in_use(&branch_name)? {
            branch_at += chrono::Duration::seconds(1);
            branch_name = inner.git.branch_name(issue.number, branch_at);
        }

        let task = Task::new(
            TaskId::generate(issue.number, now),
            issue,
            branch_name,
            inner.settings.max_retries,
            now,
        );
        inner.store.upsert_task(&task)?;
        inner.journal.info(
            &task.id,
            format!(
                "task created for issue #{} on branch {}",
                task.issue.number, task.branch_name
            ),
        );
        tracing::info!(task_id = %task.id, issue = task.issue.number, branch = %task.branch_name, "task created");

        inner.enqueue(&task.id)?;
        Ok(task)
    }

    /// Cancel a pending or running task.
    ///
    /// A pending task becomes `cancelled` immediately. A running task has
    /// its attempt signalled; it turns `cancelled` once the agent process
    /// has been terminated and reaped.
    pub fn cancel(&self, task_id: &TaskId) -> Result<Task, LifecycleError> {
        let inner = &self.inner;
        let now = Utc::now();
        // The token is looked up under the store lock so it belongs to the
        // attempt whose status was checked, not to a retry queued after it.
        let (task, (previous, token)) = inner.store.modify_task(
            task_id,
            |task| -> Result<(TaskStatus, Option<CancellationToken>), LifecycleError> {
                let previous = task.status;
                match previous {
                    TaskStatus::Pending => {
                        transition_task(task, TaskStatus::Cancelled, now)?;
                        task.error_message = Some("cancelled before admission".to_string());
                    }
                    TaskStatus::Running => {}
                    status => {
                        return Err(LifecycleError::NotCancellable {
                            task_id: task.id.clone(),
                            status,
                        })
                    }
                }
                Ok((previous, inner.token(task_id)))
            },
        )?;

        if let Some(token) = token {
            token.cancel();
        }

        if previous == TaskStatus::Pending {
            inner.disarm(task_id);
            inner.journal.warn(task_id, "cancelled while waiting for a slot");
            inner.broadcaster.finish(task_id, TaskStatus::Cancelled);
            tracing::info!(task_id = %task_id, "pending task cancelled");
            let inner = Arc::clone(inner);
            let cancelled = task.clone();
            inner.tracker.clone().spawn(async move {
                inner.announce(&Settled::Cancelled(cancelled)).await;
            });
        } else {
            inner
                .journal
                .warn(task_id, "cancellation requested; terminating agent");
            tracing::info!(task_id = %task_id, "running task cancellation requested");
        }
        Ok(task)
    }

    /// Re-queue a failed task that still has retry budget.
    ///
    /// The issue is refreshed from GitHub first when possible, so edits made
    /// since the first attempt reach the agent.
    pub async fn retry(&self, task_id: &TaskId) -> Result<Task, LifecycleError> {
        let inner = &self.inner;
        let task = inner
            .store
            .load_task(task_id)?
            .ok_or_else(|| LifecycleError::NotFound {
                task_id: task_id.clone(),
            })?;
        check_retryable(&task)?;

        let refreshed = match inner.github.get_issue(task.issue.number).await {
            Ok(issue) if issue.number == task.issue.number => Some(issue),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(task_id = %task_id, error = %err, "could not refresh issue before retry");
                None
            }
        };
        inner.requeue(task_id, refreshed)
    }

    pub fn list(&self, query: &TaskQuery) -> Result<Vec<Task>, LifecycleError> {
        Ok(self.inner.store.list_tasks(query)?)
    }

    pub fn get(&self, task_id: &TaskId) -> Result<TaskDetail, LifecycleError> {
        let task = self
            .inner
            .store
            .load_task(task_id)?
            .ok_or_else(|| LifecycleError::NotFound {
                task_id: task_id.clone(),
            })?;
        let logs = self.inner.store.list_logs(task_id, None)?;
        Ok(TaskDetail { task, logs })
    }

    pub fn tasks_for_issue(&self, issue_number: u64) -> Result<Vec<Task>, LifecycleError> {
        Ok(self.inner.store.tasks_for_issue(issue_number)?)
    }

    pub fn stats(&self) -> Result<TaskStats, LifecycleError> {
        Ok(self.inner.store.stats()?)
    }

    pub fn concurrency_stats(&self) -> ConcurrencyStats {
        self.inner.gate.stats()
    }

    pub fn subscribe_logs(&self, task_id: &TaskId) -> Result<LogStream, LifecycleError> {
        let inner = &self.inner;
        let task = inner
            .store
            .load_task(task_id)?
            .ok_or_else(|| LifecycleError::NotFound {
                task_id: task_id.clone(),
            })?;
        if task.is_terminal() {
            return inner.replay(task_id, task.status);
        }

        let Some(subscription) = inner.broadcaster.subscribe(task_id) else {
            // Finished between the load and the subscription.
            let status = inner
                .store
                .load_task(task_id)?
                .map_or(task.status, |task| task.status);
            return inner.replay(task_id, status);
        };
        Ok(LogStream {
            backlog: subscription.backlog,
            finished: None,
            live: Some(subscription.receiver),
        })
    }

    /// Stop admitting work and terminate running attempts.
    ///
    /// Attempt tokens are children of the shutdown token. Running tasks are
    /// recorded as interrupted `failed` tasks and stay retryable after a
    /// restart.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.gate.close();
        inner.tracker.close();

        let settle = inner.settings.grace_period + SHUTDOWN_SETTLE_MARGIN;
        if tokio::time::timeout(settle, inner.tracker.wait()).await.is_err() {
            tracing::warn!("running tasks did not settle before shutdown deadline");
        }
    }
}

fn check_retryable(task: &Task) -> Result<(), LifecycleError> {
    if !task.status.can_retry() {
        return Err(LifecycleError::NotRetryable {
            task_id: task.id.clone(),
            status: task.status,
        });
    }
    if task.retry_count >= task.max_retries {
        return Err(LifecycleError::RetryExhausted {
            task_id: task.id.clone(),
            retry_count: task.retry_count,
            max_retries: task.max_retries,
        });
    }
    Ok(())
}

async fn dispatch(inner: Arc<Inner>, mut queue: mpsc::UnboundedReceiver<TaskId>) {
    loop {
        let task_id = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(task_id) => task_id,
                None => break,
            },
        };
        let Some(armed) = inner.armed(&task_id) else {
            tracing::debug!(task_id = %task_id, "skipping task cancelled before dispatch");
            continue;
        };

        let admitted = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            slot = inner.gate.acquire_or_cancel(&armed.token) => slot,
        };
        match admitted {
            Ok(slot) => {
                let runner = Arc::clone(&inner);
                inner.tracker.spawn(async move {
                    runner.run_admitted(task_id, armed, slot).await;
                });
            }
            Err(GateError::Abandoned) => {
                inner.release(&task_id, armed.attempt);
                tracing::debug!(task_id = %task_id, "admission abandoned");
            }
            Err(err) => {
                tracing::warn!(error = %err, "dispatcher stopping");
                break;
            }
        }
    }
    tracing::debug!("task dispatcher stopped");
}

impl Inner {
    fn tokens(&self) -> MutexGuard<'_, AttemptTokens> {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn armed(&self, task_id: &TaskId) -> Option<ArmedAttempt> {
        self.tokens().get(task_id)
    }

    fn token(&self, task_id: &TaskId) -> Option<CancellationToken> {
        self.armed(task_id).map(|armed| armed.token)
    }

    fn release(&self, task_id: &TaskId, attempt: u64) {
        self.tokens().release(task_id, attempt);
    }

    fn disarm(&self, task_id: &TaskId) {
        self.tokens().remove(task_id);
    }

    fn enqueue(&self, task_id: &TaskId) -> Result<(), LifecycleError> {
        let attempt = self
            .tokens()
            .arm(task_id, self.shutdown.child_token());
        self.queue.send(task_id.clone()).map_err(|_| {
            self.release(task_id, attempt);
            LifecycleError::ShuttingDown
        })
    }

    fn replay(&self, task_id: &TaskId, status: TaskStatus) -> Result<LogStream, LifecycleError> {
        Ok(LogStream {
            backlog: self.store.list_logs(task_id, None)?,
            finished: Some(status),
            live: None,
        })
    }

    fn recover_interrupted(&self) -> Result<usize, LifecycleError> {
        let mut recovered = 0;
        for status in [TaskStatus::Pending, TaskStatus::Running] {
            for task in self.store.tasks_with_status(status)? {
                let now = Utc::now();
                self.store
                    .modify_task(&task.id, |task| -> Result<(), LifecycleError> {
                        transition_task(task, TaskStatus::Failed, now)?;
                        task.error_message = Some(INTERRUPTED_MESSAGE.to_string());
                        Ok(())
                    })?;
                self.journal.error(&task.id, INTERRUPTED_MESSAGE);
                self.broadcaster.finish(&task.id, TaskStatus::Failed);
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    fn requeue(&self, task_id: &TaskId, issue: Option<IssueRef>) -> Result<Task, LifecycleError> {
        if self.shutdown.is_cancelled() {
            return Err(LifecycleError::ShuttingDown);
        }
        let now = Utc::now();
        let (task, ()) = self
            .store
            .modify_task(task_id, |task| -> Result<(), LifecycleError> {
                check_retryable(task)?;
                transition_task(task, TaskStatus::Pending, now)?;
                task.retry_count += 1;
                if let Some(issue) = issue {
                    task.issue = issue;
                }
                Ok(())
            })?;

        self.journal.info(
            task_id,
            format!("retry {}/{} queued", task.retry_count, task.max_retries),
        );
        tracing::info!(task_id = %task_id, retry = task.retry_count, "task re-queued");
        self.enqueue(task_id)?;
        Ok(task)
    }

    async fn run_admitted(
        self: Arc<Self>,
        task_id: TaskId,
        armed: ArmedAttempt,
        slot: ConcurrencySlot,
    ) {
        let ArmedAttempt { attempt, token } = armed;
        let started = Utc::now();
        let begun = self
            .store
            .modify_task(&task_id, |task| -> Result<(), LifecycleError> {
                transition_task(task, TaskStatus::Running, started)?;
                Ok(())
            });
        let task = match begun {
            Ok((task, ())) => task,
            Err(err) => {
                self.release(&task_id, attempt);
                tracing::debug!(task_id = %task_id, error = %err, "admitted task is no longer pending");
                return;
            }
        };

        let stats = self.gate.stats();
        self.journal.info(
            &task_id,
            format!(
                "admitted ({} of {} slots in use)",
                stats.current_running, stats.max_concurrent
            ),
        );
        tracing::info!(task_id = %task_id, issue = task.issue.number, "task running");
        self.comment(
            task.issue.number,
            &format!(
                "Started working on this issue (task `{}`, branch `{}`).",
                task.id, task.branch_name
            ),
        )
        .await;

        let result = self.execute(&task, &token).await;
        let settled = self.settle(&task_id, result);
        self.release(&task_id, attempt);
        drop(slot);

        if let Some(settled) = settled {
            self.announce(&settled).await;
            if let Settled::Failed { retry, .. } = &settled {
                if retry.should_retry {
                    self.schedule_retry(task_id);
                }
            }
        }
    }

    async fn execute(
        &self,
        task: &Task,
        token: &CancellationToken,
    ) -> Result<Delivery, ExecutionError> {
        let task_id = &task.id;
        ensure_live(token)?;

        match self.git.create_feature_branch(&task.branch_name).await? {
            BranchPreparation::Created { stashed_leftovers } => {
                if stashed_leftovers {
                    self.journal.warn(task_id, "stashed uncommitted leftovers from the working tree");
                }
                self.journal
                    .info(task_id, format!("created branch {}", task.branch_name));
            }
            BranchPreparation::Reused { stashed_leftovers } => {
                if stashed_leftovers {
                    self.journal.warn(task_id, "stashed uncommitted leftovers from the working tree");
                }
                self.journal
                    .info(task_id, format!("checked out existing branch {}", task.branch_name));
            }
        }
        ensure_live(token)?;

        let invocation = AgentInvocation {
            task_id: task_id.clone(),
            issue: task.issue.clone(),
            branch_name: task.branch_name.clone(),
            working_dir: self.git.repo().root.clone(),
        };
        let request = RunRequest {
            task_id: task_id.clone(),
            working_dir: invocation.working_dir.clone(),
            command: self.adapter.build_command(&invocation),
            stdin: self.adapter.build_stdin(&invocation),
            timeout: self.settings.agent_timeout,
            grace_period: self.settings.grace_period,
            tail_lines: self.settings.output_tail_lines,
        };
        self.journal.info(
            task_id,
            format!(
                "running agent {} (timeout {}s)",
                self.adapter.name(),
                self.settings.agent_timeout.as_secs()
            ),
        );

        let sink: Arc<dyn OutputSink> = Arc::new(self.journal.clone());
        let outcome = self.supervisor.run(request, sink, token).await?;
        self.journal.info(
            task_id,
            format!(
                "agent exited with status {} after {:.1}s",
                outcome
                    .exit_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                outcome.duration.as_secs_f64()
            ),
        );
        let outcome = outcome.into_result()?;

        let summary = extract_development_summary(&outcome.stdout_text());
        if let Some(summary) = &summary {
            let summary = summary.clone();
            self.store
                .modify_task(task_id, |task| -> Result<(), StoreError> {
                    task.development_summary = Some(summary);
                    Ok(())
                })?;
        }
        ensure_live(token)?;

        let message =
            render_commit_message(&self.settings.commit_template, task.issue.number, &task.issue.title);
        match self.git.commit_changes(&message).await? {
            CommitOutcome::Committed { sha } => {
                self.journal.info(task_id, format!("committed {sha}"));
            }
            CommitOutcome::NoChanges => {
                self.journal.info(task_id, "working tree clean; nothing to commit");
            }
        }

        if !self.git.has_commits_ahead_of_base().await? {
            self.journal.info(task_id, NO_CHANGES_NOTE);
            return Ok(Delivery::NoChanges);
        }
        ensure_live(token)?;

        let remote = self.git.settings().remote_name.clone();
        self.git.push(&task.branch_name, token).await?;
        self.journal
            .info(task_id, format!("pushed {} to {remote}", task.branch_name));

        let execution_secs = task
            .started_at
            .map(|started| (Utc::now() - started).num_milliseconds().max(0) as f64 / 1000.0);
        let draft = PullRequestDraft {
            title: message.lines().next().unwrap_or_default().to_string(),
            body: build_pr_body(&PullRequestSummary {
                issue: &task.issue,
                branch_name: &task.branch_name,
                execution_secs,
                development_summary: summary.as_deref(),
            }),
            head: task.branch_name.clone(),
            base: self.git.settings().base_branch.clone(),
        };
        match self.github.create_pull_request(&draft).await {
            Ok(pr) => {
                self.journal.info(
                    task_id,
                    format!("opened pull request #{} {}", pr.number, pr.html_url),
                );
                if token.is_cancelled() && !self.shutdown.is_cancelled() {
                    self.journal.warn(task_id, LATE_CANCEL_NOTE);
                    tracing::warn!(task_id = %task_id, "cancellation arrived after the pull request was opened");
                }
                Ok(Delivery::PullRequest(pr))
            }
            Err(GitHubError::NoCommits { .. }) => {
                self.journal.info(task_id, NO_CHANGES_NOTE);
                Ok(Delivery::NoChanges)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Record the outcome of an attempt, then signal log subscribers.
    ///
    /// Returns `None` only when the store refused the final write.
    fn settle(&self, task_id: &TaskId, result: Result<Delivery, ExecutionError>) -> Option<Settled> {
        let now = Utc::now();
        let interrupted = self.shutdown.is_cancelled();
        let mut delivery = None;
        let mut failure = None;
        let (status, error_message) = match result {
            Ok(found) => {
                delivery = Some(found);
                (TaskStatus::Completed, None)
            }
            Err(err) if err.is_cancelled() && interrupted => {
                (TaskStatus::Failed, Some(INTERRUPTED_MESSAGE.to_string()))
            }
            Err(err) if err.is_cancelled() => (
                TaskStatus::Cancelled,
                Some("cancelled while running".to_string()),
            ),
            Err(err) => {
                let message = err.to_string();
                failure = Some(err);
                (TaskStatus::Failed, Some(message))
            }
        };

        match (&delivery, &error_message) {
            (Some(Delivery::PullRequest(pr)), _) => self.journal.info(
                task_id,
                format!("completed; pull request #{}", pr.number),
            ),
            (Some(Delivery::NoChanges), _) => self
                .journal
                .info(task_id, format!("completed: {NO_CHANGES_NOTE}")),
            (None, Some(message)) if status == TaskStatus::Cancelled => {
                self.journal.warn(task_id, message.as_str())
            }
            (None, message) => self.journal.error(
                task_id,
                format!("failed: {}", message.as_deref().unwrap_or("unknown error")),
            ),
        }

        let written = self
            .store
            .modify_task(task_id, |task| -> Result<(), LifecycleError> {
                transition_task(task, status, now)?;
                task.error_message = error_message;
                match delivery {
                    Some(Delivery::PullRequest(pr)) => task.pull_request = Some(pr),
                    Some(Delivery::NoChanges) => task.note = Some(NO_CHANGES_NOTE.to_string()),
                    None => {}
                }
                Ok(())
            });
        let task = match written {
            Ok((task, ())) => task,
            Err(err) => {
                tracing::error!(task_id = %task_id, error = %err, "failed to record task outcome");
                self.broadcaster.finish(task_id, status);
                return None;
            }
        };

        let settled = match (status, failure) {
            (TaskStatus::Completed, _) => Settled::Completed(task),
            (TaskStatus::Cancelled, _) => Settled::Cancelled(task),
            (_, Some(err)) => {
                let retry = evaluate_retry(&task, &err, &self.settings.retry);
                self.journal
                    .info(task_id, format!("retry decision: {}", retry.reason));
                Settled::Failed { task, retry }
            }
            (_, None) => Settled::Interrupted,
        };
        self.broadcaster.finish(task_id, status);
        tracing::info!(task_id = %task_id, status = %status, "task settled");
        Some(settled)
    }

    fn schedule_retry(self: Arc<Self>, task_id: TaskId) {
        let delay = self.settings.retry.delay;
        let tracker = self.tracker.clone();
        tracker.spawn(async move {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            match self.requeue(&task_id, None) {
                Ok(_) => {}
                Err(err @ (LifecycleError::NotRetryable { .. } | LifecycleError::RetryExhausted { .. })) => {
                    tracing::debug!(task_id = %task_id, error = %err, "automatic retry skipped");
                }
                Err(err) => {
                    tracing::warn!(task_id = %task_id, error = %err, "automatic retry failed");
                }
            }
        });
    }

    /// Best-effort issue comment describing how a task settled.
    async fn announce(&self, settled: &Settled) {
        let (task, body) = match settled {
            Settled::Completed(task) => match &task.pull_request {
                Some(pr) => (
                    task,
                    format!("Opened pull request #{}: {}", pr.number, pr.html_url),
                ),
                None => (
                    task,
                    format!(
                        "Finished task `{}`: the agent produced no changes, so no pull request was opened.",
                        task.id
                    ),
                ),
            },
            Settled::Cancelled(task) => (task, format!("Task `{}` was cancelled.", task.id)),
            Settled::Failed { task, retry } => {
                let mut body = format!(
                    "Task `{}` failed: {}",
                    task.id,
                    task.error_message.as_deref().unwrap_or("unknown error")
                );
                if retry.should_retry {
                    body.push_str(&format!("\n\nRetrying automatically: {}.", retry.reason));
                }
                (task, body)
            }
            Settled::Interrupted => return,
        };
        self.comment(task.issue.number, &body).await;
    }

    async fn comment(&self, issue_number: u64, body: &str) {
        if let Err(err) = self.github.add_comment(issue_number, body).await {
            tracing::warn!(issue = issue_number, error = %err, "failed to comment on issue");
        }
    }
}

fn ensure_live(token: &CancellationToken) -> Result<(), ExecutionError> {
    if token.is_cancelled() {
        Err(ExecutionError::Cancelled)
    } else {
        Ok(())
    }
}
