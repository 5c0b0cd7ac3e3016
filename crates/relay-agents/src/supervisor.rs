//! Runs one agent process to completion, timeout or cancellation.
//!
//! The child is spawned in its own process group so that termination reaches
//! any helpers it started. Every exit path waits on the child before
//! returning.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_core::TaskId;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ProcessError;
use crate::sink::OutputSink;
use crate::types::{OutputStream, RunOutcome, RunRequest};

const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

enum Ending {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self
    }

    /// Run `request` and stream its output into `sink`.
    ///
    /// A natural exit (any status) is `Ok`; use [`RunOutcome::into_result`]
    /// to treat a non-zero status as a failure. Expiry of the timeout and
    /// firing of `cancel` are reported as distinct errors.
    pub async fn run(
        &self,
        request: RunRequest,
        sink: Arc<dyn OutputSink>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, ProcessError> {
        validate(&request)?;
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let mut command = Command::new(&request.command.executable);
        command
            .args(&request.command.args)
            .envs(request.command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&request.working_dir)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            executable: request.command.executable.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::info!(
            task_id = %request.task_id,
            pid = ?pid,
            executable = %request.command.executable,
            "agent process started"
        );

        if let (Some(input), Some(mut stdin)) = (request.stdin.clone(), child.stdin.take()) {
            let task_id = request.task_id.clone();
            tokio::spawn(async move {
                if let Err(err) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!(task_id = %task_id, error = %err, "agent closed stdin early");
                }
            });
        }

        let stdout = child.stdout.take().ok_or_else(|| ProcessError::Runtime {
            message: "stdout pipe was not available".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ProcessError::Runtime {
            message: "stderr pipe was not available".to_string(),
        })?;

        let mut stdout_task = tokio::spawn(pump_lines(
            stdout,
            OutputStream::Stdout,
            request.task_id.clone(),
            Arc::clone(&sink),
            request.tail_lines,
        ));
        let mut stderr_task = tokio::spawn(pump_lines(
            stderr,
            OutputStream::Stderr,
            request.task_id.clone(),
            Arc::clone(&sink),
            request.tail_lines,
        ));

        let ending = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Ending::Exited(status),
                Err(err) => {
                    force_kill(&mut child, pid);
                    let _ = child.wait().await;
                    return Err(ProcessError::Runtime {
                        message: format!("waiting on agent failed: {err}"),
                    });
                }
            },
            _ = tokio::time::sleep(request.timeout) => {
                tracing::warn!(task_id = %request.task_id, timeout = ?request.timeout, "agent timed out; killing");
                force_kill(&mut child, pid);
                Ending::TimedOut
            }
            _ = cancel.cancelled() => {
                tracing::info!(task_id = %request.task_id, "agent cancelled; terminating");
                terminate(&mut child, pid, request.grace_period).await;
                Ending::Cancelled
            }
        };

        if !matches!(ending, Ending::Exited(_)) {
            if let Err(err) = child.wait().await {
                tracing::warn!(task_id = %request.task_id, error = %err, "failed to reap agent process");
            }
        }

        let stdout_tail = drain(&mut stdout_task).await;
        let stderr_tail = drain(&mut stderr_task).await;
        let duration = started.elapsed();

        match ending {
            Ending::Exited(status) => {
                tracing::info!(
                    task_id = %request.task_id,
                    exit_code = ?status.code(),
                    elapsed = ?duration,
                    "agent process exited"
                );
                Ok(RunOutcome {
                    exit_code: status.code(),
                    success: status.success(),
                    stdout_tail,
                    stderr_tail,
                    duration,
                })
            }
            Ending::TimedOut => Err(ProcessError::Timeout {
                after: request.timeout,
                stderr_tail: stderr_tail.join("\n"),
            }),
            Ending::Cancelled => Err(ProcessError::Cancelled),
        }
    }
}

fn validate(request: &RunRequest) -> Result<(), ProcessError> {
    if request.command.executable.trim().is_empty() {
        return Err(ProcessError::InvalidRequest {
            message: "executable must not be empty".to_string(),
        });
    }
    if request.timeout.is_zero() {
        return Err(ProcessError::InvalidRequest {
            message: "timeout must be greater than zero".to_string(),
        });
    }
    Ok(())
}

async fn pump_lines<R>(
    reader: R,
    stream: OutputStream,
    task_id: TaskId,
    sink: Arc<dyn OutputSink>,
    tail_lines: usize,
) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut tail = VecDeque::with_capacity(tail_lines.min(1024));
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                sink.on_line(&task_id, stream, line);
                if tail_lines > 0 {
                    if tail.len() == tail_lines {
                        tail.pop_front();
                    }
                    tail.push_back(line.to_string());
                }
            }
            Err(err) => {
                tracing::debug!(task_id = %task_id, ?stream, error = %err, "agent output read failed");
                break;
            }
        }
    }

    tail.into_iter().collect()
}

/// Wait for a reader task, abandoning it if a grandchild keeps the pipe open.
async fn drain(handle: &mut JoinHandle<Vec<String>>) -> Vec<String> {
    match tokio::time::timeout(IO_DRAIN_TIMEOUT, &mut *handle).await {
        Ok(Ok(lines)) => lines,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            handle.abort();
            Vec::new()
        }
    }
}

/// SIGTERM the group, then SIGKILL whatever is left after `grace`.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) {
    signal_group(pid, GroupSignal::Terminate);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => signal_group(pid, GroupSignal::Kill),
        Err(_) => force_kill(child, pid),
    }
}

fn force_kill(child: &mut Child, pid: Option<u32>) {
    signal_group(pid, GroupSignal::Kill);
    if let Err(err) = child.start_kill() {
        tracing::debug!(error = %err, "start_kill on agent failed");
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: GroupSignal) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(pid), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => tracing::warn!(pgid = pid, error = %err, "failed to signal agent process group"),
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: GroupSignal) {}
