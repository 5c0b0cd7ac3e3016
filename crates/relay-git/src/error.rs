use std::path::PathBuf;
use std::string::FromUtf8Error;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git command returned non-zero exit ({command}) status={status:?}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("git command output was not valid UTF-8 ({command}, {stream}): {source}")]
    NonUtf8Output {
        command: String,
        stream: &'static str,
        #[source]
        source: FromUtf8Error,
    },
    #[error("git command timed out after {after:?} ({command})")]
    TimedOut { command: String, after: Duration },
    #[error("git command cancelled ({command})")]
    Cancelled { command: String },
    #[error("path is not inside a git repository: {path}")]
    NotARepository { path: PathBuf },
    #[error("invalid git output: {context}")]
    Parse { context: String },
    #[error("cannot prepare branch {branch}: {reason}")]
    Branch { branch: String, reason: String },
    #[error("working tree has unresolved conflicts in: {}", paths.join(", "))]
    Conflict { paths: Vec<String> },
    #[error("push of {branch} to {remote} rejected: {cause}")]
    Push {
        branch: String,
        remote: String,
        cause: String,
        transient: bool,
    },
}

impl GitError {
    /// Whether retrying the same operation later may succeed without anyone
    /// touching the repository. Only network hiccups during a push qualify.
    pub fn is_transient(&self) -> bool {
        matches!(self, GitError::Push { transient: true, .. })
    }

    /// Trimmed stderr of a failed command, or the rendered error otherwise.
    pub fn detail(&self) -> String {
        match self {
            GitError::CommandFailed { stderr, stdout, .. } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    stdout.trim().to_string()
                } else {
                    stderr.to_string()
                }
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GitError;
    use std::error::Error;
    use std::path::PathBuf;

    #[test]
    fn io_variant_includes_command_and_io_message() {
        let err = GitError::Io {
            command: "git status".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing binary"),
        };

        let rendered = err.to_string();
        assert!(rendered.contains("git command failed to start (git status)"));
        assert!(rendered.contains("missing binary"));
        assert!(err.source().is_some());
    }

    #[test]
    fn conflict_lists_every_path() {
        let err = GitError::Conflict {
            paths: vec!["src/lib.rs".to_string(), "README.md".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "working tree has unresolved conflicts in: src/lib.rs, README.md"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn only_transient_push_failures_are_transient() {
        let network = GitError::Push {
            branch: "ai/feature-1-2".to_string(),
            remote: "origin".to_string(),
            cause: "Could not resolve host: github.com".to_string(),
            transient: true,
        };
        let rejected = GitError::Push {
            branch: "ai/feature-1-2".to_string(),
            remote: "origin".to_string(),
            cause: "non-fast-forward".to_string(),
            transient: false,
        };
        let branch = GitError::Branch {
            branch: "main".to_string(),
            reason: "diverged".to_string(),
        };

        assert!(network.is_transient());
        assert!(!rejected.is_transient());
        assert!(!branch.is_transient());
        assert!(rejected
            .to_string()
            .contains("push of ai/feature-1-2 to origin rejected: non-fast-forward"));
    }

    #[test]
    fn detail_prefers_stderr_and_falls_back_to_stdout() {
        let err = GitError::CommandFailed {
            command: "git commit".to_string(),
            status: Some(1),
            stdout: "nothing to commit\n".to_string(),
            stderr: "  ".to_string(),
        };
        assert_eq!(err.detail(), "nothing to commit");

        let parse = GitError::Parse {
            context: "expected count".to_string(),
        };
        assert_eq!(parse.detail(), "invalid git output: expected count");

        let repo = GitError::NotARepository {
            path: PathBuf::from("/tmp/example"),
        };
        assert!(repo.detail().contains("/tmp/example"));
    }
}
