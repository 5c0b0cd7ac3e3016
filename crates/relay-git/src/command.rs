use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Result of a git invocation whose exit status the caller interprets itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitExit {
    pub command: String,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitExit {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn into_output(self) -> Result<GitOutput, GitError> {
        if !self.success() {
            return Err(GitError::CommandFailed {
                command: self.command,
                status: self.status,
                stdout: self.stdout,
                stderr: self.stderr,
            });
        }
        Ok(GitOutput {
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCli {
    pub binary: PathBuf,
    /// Upper bound for a single invocation; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
            timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run<I, S>(&self, cwd: &Path, args: I) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.exec(cwd, args, None).await?.into_output()
    }

    /// Like [`GitCli::run`], but abandons (and kills) the command once `cancel` fires.
    pub async fn run_cancellable<I, S>(
        &self,
        cwd: &Path,
        args: I,
        cancel: &CancellationToken,
    ) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.exec(cwd, args, Some(cancel)).await?.into_output()
    }

    /// Run without treating a non-zero exit as an error.
    pub async fn probe<I, S>(&self, cwd: &Path, args: I) -> Result<GitExit, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.exec(cwd, args, None).await
    }

    async fn exec<I, S>(
        &self,
        cwd: &Path,
        args: I,
        cancel: Option<&CancellationToken>,
    ) -> Result<GitExit, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let owned_args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();

        let mut command = Command::new(&self.binary);
        command
            .current_dir(cwd)
            .args(&owned_args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let rendered = render_command(&self.binary, &owned_args);
        tracing::debug!(command = %rendered, cwd = %cwd.display(), "running git");

        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);
        let limit = self.timeout.unwrap_or(Duration::MAX);

        // Dropping the `output()` future kills the child (kill_on_drop).
        let output = tokio::select! {
            result = command.output() => result.map_err(|source| GitError::Io {
                command: rendered.clone(),
                source,
            })?,
            _ = tokio::time::sleep(limit) => {
                return Err(GitError::TimedOut { command: rendered, after: limit });
            }
            _ = cancel.cancelled() => {
                return Err(GitError::Cancelled { command: rendered });
            }
        };

        let stdout =
            String::from_utf8(output.stdout).map_err(|source| GitError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stdout",
                source,
            })?;
        let stderr =
            String::from_utf8(output.stderr).map_err(|source| GitError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stderr",
                source,
            })?;

        Ok(GitExit {
            command: rendered,
            status: output.status.code(),
            stdout,
            stderr,
        })
    }
}

fn render_command(binary: &Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
