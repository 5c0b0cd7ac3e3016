//! End-to-end runs of the engine against real git repositories and a
//! shell-script agent, with GitHub replaced by a recorder.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use relay_agents::{CommandAdapter, SUMMARY_END, SUMMARY_START};
use relay_core::{parse_config, IssueRef, PullRequestRef, RelayConfig, Task, TaskId, TaskStatus};
use relay_git::{GitAutomation, GitCli, GitSettings};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::Notify;

use crate::error::LifecycleError;
use crate::github::{GitHubApi, GitHubError, PullRequestDraft};
use crate::intake::{InboundDelivery, IntakeAck, IntakeError};
use crate::health::{HealthStatus, CHECK_AGENT, CHECK_CONFIG, CHECK_REPOSITORY};
use crate::lifecycle::{LATE_CANCEL_NOTE, NO_CHANGES_NOTE};
use crate::service::RelayService;
use crate::signature::sign;
use crate::store::TaskStore;
use crate::trigger::NoOpReason;

const SECRET: &str = "s3cret";
const SETTLE_DEADLINE: Duration = Duration::from_secs(20);

#[derive(Default)]
struct RecordingGitHub {
    pulls: Mutex<Vec<PullRequestDraft>>,
    comments: Mutex<Vec<(u64, String)>>,
    /// When set, pull request creation waits for `release_pull`.
    hold_pulls: AtomicBool,
    pull_entered: Notify,
    release_pull: Notify,
}

impl RecordingGitHub {
    fn pulls(&self) -> Vec<PullRequestDraft> {
        self.pulls.lock().expect("pulls").clone()
    }

    fn comments(&self) -> Vec<(u64, String)> {
        self.comments.lock().expect("comments").clone()
    }
}

#[async_trait]
impl GitHubApi for RecordingGitHub {
    async fn get_issue(&self, number: u64) -> Result<IssueRef, GitHubError> {
        Ok(IssueRef {
            number,
            title: "Refreshed title".to_string(),
            body: "edited since the first attempt".to_string(),
            html_url: format!("https://github.com/acme/widgets/issues/{number}"),
        })
    }

    async fn create_pull_request(
        &self,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestRef, GitHubError> {
        if self.hold_pulls.load(Ordering::SeqCst) {
            self.pull_entered.notify_one();
            self.release_pull.notified().await;
        }
        let mut pulls = self.pulls.lock().expect("pulls");
        pulls.push(draft.clone());
        let number = pulls.len() as u64;
        Ok(PullRequestRef {
            number,
            html_url: format!("https://github.com/acme/widgets/pull/{number}"),
        })
    }

    async fn add_comment(&self, issue_number: u64, body: &str) -> Result<(), GitHubError> {
        self.comments
            .lock()
            .expect("comments")
            .push((issue_number, body.to_string()));
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    remote: PathBuf,
    database: PathBuf,
    service: RelayService,
    github: Arc<RecordingGitHub>,
}

fn git_ok(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn git_succeeds(cwd: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("spawn git")
        .status
        .success()
}

/// A bare `remote.git` and a `work` clone on `main` with one commit.
fn init_repos(parent: &Path) -> (PathBuf, PathBuf) {
    let remote = parent.join("remote.git");
    fs::create_dir_all(&remote).expect("create remote dir");
    git_ok(&remote, &["init", "--bare", "--quiet"]);
    git_ok(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

    let work = parent.join("work");
    fs::create_dir_all(&work).expect("create work dir");
    git_ok(&work, &["init", "--quiet"]);
    git_ok(&work, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git_ok(&work, &["config", "user.name", "Test User"]);
    git_ok(&work, &["config", "user.email", "test@example.com"]);
    git_ok(&work, &["config", "commit.gpgsign", "false"]);
    fs::write(work.join("README.md"), "init\n").expect("write readme");
    git_ok(&work, &["add", "README.md"]);
    git_ok(&work, &["commit", "--quiet", "-m", "init"]);

    let remote_str = remote.to_string_lossy().into_owned();
    git_ok(&work, &["remote", "add", "origin", &remote_str]);
    git_ok(&work, &["push", "--quiet", "-u", "origin", "main"]);
    (remote, work)
}

fn base_config(work: &Path) -> RelayConfig {
    let mut config = parse_config(
        r#"
[github]
webhook_secret = "s3cret"
owner = "acme"
repo = "widgets"
trigger_label = "ai-dev"
trigger_command = "@ai-dev"

[repository]
path = "."

[agent]
executable = "sh"
timeout_secs = 30
grace_period_secs = 1

[tasks]
max_concurrent = 1
max_retries = 2
auto_retry = false
retry_delay_secs = 0
"#,
    )
    .expect("parse config");
    config.repository.path = work.to_path_buf();
    config
}

async fn harness(script: &str, tune: impl FnOnce(&mut RelayConfig)) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let (remote, work) = init_repos(dir.path());
    let mut config = base_config(&work);
    tune(&mut config);

    let git = GitAutomation::open(
        work,
        GitCli::default(),
        GitSettings::from(&config.repository),
    )
    .await
    .expect("open repo");
    let database = dir.path().join("relay.sqlite");
    let store = Arc::new(TaskStore::open(&database).expect("store"));
    let github = Arc::new(RecordingGitHub::default());
    let adapter = Arc::new(CommandAdapter {
        executable: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
    });

    let service = RelayService::assemble(config, store, git, github.clone(), adapter)
        .expect("assemble service");
    Harness {
        _dir: dir,
        remote,
        database,
        service,
        github,
    }
}

fn issue_json(number: u64, labels: &[&str]) -> Value {
    json!({
        "number": number,
        "title": format!("Issue {number}"),
        "body": "Make the widget blue",
        "html_url": format!("https://github.com/acme/widgets/issues/{number}"),
        "labels": labels.iter().map(|name| json!({"name": name})).collect::<Vec<_>>(),
    })
}

fn labeled(number: u64) -> Value {
    json!({
        "action": "labeled",
        "label": {"name": "ai-dev"},
        "issue": issue_json(number, &["ai-dev"]),
    })
}

fn deliver(
    service: &RelayService,
    event: &str,
    delivery_id: &str,
    payload: &Value,
) -> Result<IntakeAck, IntakeError> {
    let body = serde_json::to_vec(payload).expect("encode payload");
    let signature = sign(&body, SECRET.as_bytes()).expect("sign");
    service.intake.handle(InboundDelivery {
        signature: Some(&signature),
        event_type: Some(event),
        delivery_id: Some(delivery_id),
        body: &body,
    })
}

fn accepted(ack: IntakeAck) -> TaskId {
    match ack {
        IntakeAck::Accepted { task_id, .. } => task_id,
        other => panic!("expected accepted delivery, got {other:?}"),
    }
}

async fn wait_for(
    service: &RelayService,
    task_id: &TaskId,
    done: impl Fn(&Task) -> bool,
) -> Task {
    let deadline = Instant::now() + SETTLE_DEADLINE;
    loop {
        let task = service.lifecycle.get(task_id).expect("load task").task;
        if done(&task) {
            return task;
        }
        assert!(
            Instant::now() < deadline,
            "task {task_id} stuck in {}",
            task.status
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_terminal(service: &RelayService, task_id: &TaskId) -> Task {
    wait_for(service, task_id, Task::is_terminal).await
}

fn summary_script() -> String {
    format!(
        "echo 'blue widget' > widget.txt; echo '{SUMMARY_START}'; \
         echo 'Changed the widget colour to blue and added a regression note for it.'; \
         echo '{SUMMARY_END}'"
    )
}

#[tokio::test]
async fn labeled_issue_runs_to_a_pull_request() {
    let h = harness(&summary_script(), |_| {}).await;

    let task_id = accepted(deliver(&h.service, "issues", "d-1", &labeled(42)).expect("deliver"));
    let task = wait_terminal(&h.service, &task_id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.success, Some(true));
    assert!(task.branch_name.starts_with("ai/feature-42-"));
    assert!(task.execution_secs.is_some());
    assert!(task
        .development_summary
        .as_deref()
        .is_some_and(|summary| summary.contains("colour to blue")));
    assert_eq!(task.pull_request.as_ref().map(|pr| pr.number), Some(1));

    let pulls = h.github.pulls();
    assert_eq!(pulls.len(), 1);
    assert_eq!(pulls[0].head, task.branch_name);
    assert_eq!(pulls[0].base, "main");
    assert!(pulls[0].body.contains("Closes #42"));

    let branch_ref = format!("refs/heads/{}", task.branch_name);
    assert!(git_succeeds(&h.remote, &["rev-parse", "--verify", &branch_ref]));

    let stream = h.service.lifecycle.subscribe_logs(&task_id).expect("logs");
    assert!(stream.live.is_none());
    assert_eq!(stream.finished, Some(TaskStatus::Completed));
    assert!(stream
        .backlog
        .iter()
        .any(|entry| entry.message == "blue widget" || entry.message.contains("pull request")));

    let comments = h.github.comments();
    assert!(comments
        .iter()
        .any(|(issue, body)| *issue == 42 && body.contains("pull request #1")));
    h.service.shutdown().await;
}

#[tokio::test]
async fn comment_command_matches_case_insensitively() {
    let h = harness("echo nothing to change", |_| {}).await;
    let payload = json!({
        "action": "created",
        "issue": issue_json(7, &[]),
        "comment": {"body": "Could you take this? @AI-DEV please"},
    });

    let task_id = accepted(deliver(&h.service, "issue_comment", "d-1", &payload).expect("deliver"));
    let task = wait_terminal(&h.service, &task_id).await;
    assert_eq!(task.issue.number, 7);

    let silent = json!({
        "action": "created",
        "issue": issue_json(7, &[]),
        "comment": {"body": "looks good to me"},
    });
    let ack = deliver(&h.service, "issue_comment", "d-2", &silent).expect("deliver");
    assert!(matches!(
        ack,
        IntakeAck::Ignored {
            reason: NoOpReason::CommandAbsent,
            ..
        }
    ));
    assert_eq!(h.service.lifecycle.tasks_for_issue(7).expect("tasks").len(), 1);
    h.service.shutdown().await;
}

#[tokio::test]
async fn agent_without_changes_completes_with_note() {
    let h = harness("echo nothing to change", |_| {}).await;

    let task_id = accepted(deliver(&h.service, "issues", "d-1", &labeled(5)).expect("deliver"));
    let task = wait_terminal(&h.service, &task_id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.note.as_deref(), Some(NO_CHANGES_NOTE));
    assert!(task.pull_request.is_none());
    assert!(h.github.pulls().is_empty());
    h.service.shutdown().await;
}

#[tokio::test]
async fn agent_timeout_fails_the_task() {
    let h = harness("sleep 10", |config| {
        config.agent.timeout_secs = 1;
    })
    .await;

    let started = Instant::now();
    let task_id = accepted(deliver(&h.service, "issues", "d-1", &labeled(9)).expect("deliver"));
    let task = wait_terminal(&h.service, &task_id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.success, Some(false));
    assert!(task
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("timed out")));
    assert!(started.elapsed() < Duration::from_secs(9));
    assert_eq!(task.retry_count, 0);
    h.service.shutdown().await;
}

#[tokio::test]
async fn timed_out_task_is_retried_automatically_until_budget_runs_out() {
    let h = harness("sleep 10", |config| {
        config.agent.timeout_secs = 1;
        config.tasks.auto_retry = true;
        config.tasks.max_retries = 1;
    })
    .await;

    let task_id = accepted(deliver(&h.service, "issues", "d-1", &labeled(11)).expect("deliver"));
    let task = wait_for(&h.service, &task_id, |task| {
        task.retry_count == 1 && task.is_terminal()
    })
    .await;

    assert_eq!(task.status, TaskStatus::Failed);
    let comments = h.github.comments();
    assert!(comments
        .iter()
        .any(|(_, body)| body.contains("Retrying automatically")));

    let err = h.service.lifecycle.retry(&task_id).await.expect_err("budget spent");
    assert!(matches!(err, LifecycleError::RetryExhausted { .. }));
    h.service.shutdown().await;
}

#[tokio::test]
async fn single_slot_serializes_tasks_in_arrival_order() {
    let h = harness(
        "sleep 1; echo change > \"issue-$RELAY_ISSUE_NUMBER.txt\"",
        |config| config.tasks.max_concurrent = 1,
    )
    .await;

    let first = accepted(deliver(&h.service, "issues", "d-1", &labeled(1)).expect("deliver"));
    let second = accepted(deliver(&h.service, "issues", "d-2", &labeled(2)).expect("deliver"));

    wait_for(&h.service, &first, |task| task.status == TaskStatus::Running).await;
    let waiting = h.service.lifecycle.get(&second).expect("second").task;
    assert_eq!(waiting.status, TaskStatus::Pending);

    let first = wait_terminal(&h.service, &first).await;
    let second = wait_terminal(&h.service, &second).await;
    assert_eq!(first.status, TaskStatus::Completed);
    assert_eq!(second.status, TaskStatus::Completed);

    let first_done = first.completed_at.expect("first completed_at");
    let second_started = second.started_at.expect("second started_at");
    assert!(second_started >= first_done);
    assert_eq!(h.github.pulls().len(), 2);
    h.service.shutdown().await;
}

#[tokio::test]
async fn burst_of_triggers_never_exceeds_capacity() {
    let h = harness("sleep 1", |config| config.tasks.max_concurrent = 2).await;

    let ids: Vec<TaskId> = (1..=5)
        .map(|number| {
            accepted(
                deliver(&h.service, "issues", &format!("d-{number}"), &labeled(number))
                    .expect("deliver"),
            )
        })
        .collect();

    let deadline = Instant::now() + SETTLE_DEADLINE;
    loop {
        let stats = h.service.lifecycle.stats().expect("stats");
        assert!(stats.running <= 2, "{} tasks running", stats.running);
        assert!(h.service.lifecycle.concurrency_stats().current_running <= 2);
        if stats.pending == 0 && stats.running == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "burst did not drain");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for id in &ids {
        assert!(h.service.lifecycle.get(id).expect("task").task.is_terminal());
    }
    h.service.shutdown().await;
}

#[tokio::test]
async fn duplicate_delivery_creates_one_task() {
    let h = harness("echo nothing to change", |_| {}).await;

    let first = deliver(&h.service, "issues", "d-same", &labeled(3)).expect("deliver");
    let again = deliver(&h.service, "issues", "d-same", &labeled(3)).expect("deliver");

    let task_id = accepted(first);
    assert!(matches!(
        again,
        IntakeAck::Ignored {
            reason: NoOpReason::DuplicateDelivery { .. },
            ..
        }
    ));
    wait_terminal(&h.service, &task_id).await;
    assert_eq!(h.service.lifecycle.tasks_for_issue(3).expect("tasks").len(), 1);
    h.service.shutdown().await;
}

#[tokio::test]
async fn forged_signature_is_rejected_before_routing() {
    let h = harness("true", |_| {}).await;
    let body = serde_json::to_vec(&labeled(4)).expect("encode");

    let err = h
        .service
        .intake
        .handle(InboundDelivery {
            signature: Some("sha256=00"),
            event_type: Some("issues"),
            delivery_id: Some("d-1"),
            body: &body,
        })
        .expect_err("forged");
    assert!(matches!(err, IntakeError::Signature(_)));

    let ping = deliver(&h.service, "ping", "d-2", &json!({"zen": "Keep it simple."}))
        .expect("ping");
    assert_eq!(
        ping,
        IntakeAck::Pong {
            zen: Some("Keep it simple.".to_string())
        }
    );
    assert_eq!(h.service.lifecycle.stats().expect("stats").total, 0);
    h.service.shutdown().await;
}

#[tokio::test]
async fn cancelling_a_running_task_stops_the_agent() {
    let h = harness("sleep 30", |config| config.agent.grace_period_secs = 1).await;

    let started = Instant::now();
    let task_id = accepted(deliver(&h.service, "issues", "d-1", &labeled(8)).expect("deliver"));
    wait_for(&h.service, &task_id, |task| task.status == TaskStatus::Running).await;

    let acknowledged = h.service.lifecycle.cancel(&task_id).expect("cancel");
    assert_eq!(acknowledged.status, TaskStatus::Running);

    let task = wait_terminal(&h.service, &task_id).await;
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(h.service.lifecycle.concurrency_stats().current_running, 0);

    let err = h.service.lifecycle.cancel(&task_id).expect_err("already finished");
    assert!(matches!(err, LifecycleError::NotCancellable { .. }));
    h.service.shutdown().await;
}

#[tokio::test]
async fn cancelling_a_pending_task_never_runs_it() {
    let h = harness("sleep 2", |config| config.tasks.max_concurrent = 1).await;

    let first = accepted(deliver(&h.service, "issues", "d-1", &labeled(1)).expect("deliver"));
    let second = accepted(deliver(&h.service, "issues", "d-2", &labeled(2)).expect("deliver"));
    wait_for(&h.service, &first, |task| task.status == TaskStatus::Running).await;

    let cancelled = h.service.lifecycle.cancel(&second).expect("cancel");
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.started_at.is_none());

    wait_terminal(&h.service, &first).await;
    let second = h.service.lifecycle.get(&second).expect("second").task;
    assert_eq!(second.status, TaskStatus::Cancelled);
    assert!(second.started_at.is_none());
    h.service.shutdown().await;
}

#[tokio::test]
async fn manual_retry_refreshes_issue_and_respects_budget() {
    let h = harness("echo broken >&2; exit 3", |config| {
        config.tasks.auto_retry = true;
        config.tasks.max_retries = 1;
    })
    .await;

    let task_id = accepted(deliver(&h.service, "issues", "d-1", &labeled(12)).expect("deliver"));
    let failed = wait_terminal(&h.service, &task_id).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.retry_count, 0);
    assert!(failed
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("broken")));

    let requeued = h.service.lifecycle.retry(&task_id).await.expect("retry");
    assert_eq!(requeued.retry_count, 1);
    assert_eq!(requeued.issue.title, "Refreshed title");
    assert!(requeued.error_message.is_none());

    let failed = wait_terminal(&h.service, &task_id).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.retry_count, 1);

    let err = h.service.lifecycle.retry(&task_id).await.expect_err("exhausted");
    assert!(matches!(
        err,
        LifecycleError::RetryExhausted {
            retry_count: 1,
            max_retries: 1,
            ..
        }
    ));
    h.service.shutdown().await;
}

#[tokio::test]
async fn finished_tasks_are_not_retryable() {
    let h = harness("echo nothing to change", |_| {}).await;

    let task_id = accepted(deliver(&h.service, "issues", "d-1", &labeled(6)).expect("deliver"));
    wait_terminal(&h.service, &task_id).await;

    let err = h.service.lifecycle.retry(&task_id).await.expect_err("completed");
    assert!(matches!(
        err,
        LifecycleError::NotRetryable {
            status: TaskStatus::Completed,
            ..
        }
    ));

    let missing = h
        .service
        .lifecycle
        .retry(&TaskId::new("task-missing"))
        .await
        .expect_err("missing");
    assert!(matches!(missing, LifecycleError::NotFound { .. }));
    h.service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_task_retried_the_moment_it_settles_runs_again() {
    const ROUNDS: u32 = 25;
    let h = harness("exit 1", |config| config.tasks.max_retries = ROUNDS).await;

    let task_id = accepted(deliver(&h.service, "issues", "d-1", &labeled(21)).expect("deliver"));
    for round in 0..ROUNDS {
        let failed = wait_for(&h.service, &task_id, |task| {
            task.status == TaskStatus::Failed && task.retry_count == round
        })
        .await;
        assert_eq!(failed.retry_count, round);
        let requeued = h.service.lifecycle.retry(&task_id).await.expect("retry");
        assert_eq!(requeued.retry_count, round + 1);
    }

    let last = wait_for(&h.service, &task_id, |task| {
        task.retry_count == ROUNDS && task.is_terminal()
    })
    .await;
    assert_eq!(last.status, TaskStatus::Failed);
    h.service.shutdown().await;
}

#[tokio::test]
async fn redelivery_after_a_storage_failure_creates_the_task() {
    let h = harness("echo nothing to change", |_| {}).await;
    let side = rusqlite::Connection::open(&h.database).expect("open database");
    side.execute_batch("ALTER TABLE tasks RENAME TO tasks_offline")
        .expect("take table offline");

    let err = deliver(&h.service, "issues", "d-redeliver", &labeled(11))
        .expect_err("store is unavailable");
    assert!(matches!(err, IntakeError::Lifecycle(LifecycleError::Store(_))));

    side.execute_batch("ALTER TABLE tasks_offline RENAME TO tasks")
        .expect("restore table");
    let task_id = accepted(
        deliver(&h.service, "issues", "d-redeliver", &labeled(11)).expect("redeliver"),
    );
    wait_terminal(&h.service, &task_id).await;
    assert_eq!(h.service.lifecycle.tasks_for_issue(11).expect("tasks").len(), 1);
    h.service.shutdown().await;
}

#[tokio::test]
async fn cancel_during_pull_request_creation_is_journaled_as_too_late() {
    let h = harness(&summary_script(), |_| {}).await;
    h.github.hold_pulls.store(true, Ordering::SeqCst);

    let task_id = accepted(deliver(&h.service, "issues", "d-1", &labeled(31)).expect("deliver"));
    tokio::time::timeout(SETTLE_DEADLINE, h.github.pull_entered.notified())
        .await
        .expect("pull request requested");
    let acknowledged = h.service.lifecycle.cancel(&task_id).expect("cancel");
    assert_eq!(acknowledged.status, TaskStatus::Running);
    h.github.release_pull.notify_one();

    let task = wait_terminal(&h.service, &task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.pull_request.is_some());
    let logs = h.service.lifecycle.get(&task_id).expect("detail").logs;
    assert!(logs.iter().any(|entry| entry.message == LATE_CANCEL_NOTE));
    h.service.shutdown().await;
}

#[tokio::test]
async fn health_passes_with_a_real_repository_and_agent() {
    let h = harness("true", |_| {}).await;

    let report = h.service.health().await;
    assert_eq!(report.status, HealthStatus::Healthy, "{report:?}");
    for check in [CHECK_CONFIG, CHECK_REPOSITORY, CHECK_AGENT] {
        assert!(report.checks[check].healthy, "{check} failed");
    }
    h.service.shutdown().await;
}

#[tokio::test]
async fn shutdown_records_running_task_as_interrupted_without_commenting() {
    let h = harness("sleep 30", |config| config.agent.grace_period_secs = 1).await;

    let task_id = accepted(deliver(&h.service, "issues", "d-1", &labeled(41)).expect("deliver"));
    wait_for(&h.service, &task_id, |task| task.status == TaskStatus::Running).await;
    h.service.shutdown().await;

    let task = h.service.lifecycle.get(&task_id).expect("task").task;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task
        .error_message
        .as_deref()
        .is_some_and(|message| message.starts_with("interrupted")));
    let comments = h.github.comments();
    assert!(comments.iter().all(|(_, body)| !body.contains("failed")));
}
