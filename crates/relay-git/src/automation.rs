//! Branch, commit and push steps run around an agent session.
//!
//! Every operation works against one shared working tree, so callers must
//! not run two tasks' git phases against the same [`GitAutomation`] at once.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use relay_core::RepositoryConfig;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::command::GitCli;
use crate::error::GitError;
use crate::repo::{
    branch_exists, commits_ahead, conflicted_paths, discover_repo, has_uncommitted_changes,
    head_sha, RepoHandle,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSettings {
    pub base_branch: String,
    pub remote_name: String,
    pub branch_prefix: String,
    pub committer_name: String,
    pub committer_email: String,
}

impl From<&RepositoryConfig> for GitSettings {
    fn from(config: &RepositoryConfig) -> Self {
        Self {
            base_branch: config.base_branch.clone(),
            remote_name: config.remote_name.clone(),
            branch_prefix: config.branch_prefix.clone(),
            committer_name: config.committer_name.clone(),
            committer_email: config.committer_email.clone(),
        }
    }
}

/// `<prefix>-<issue_number>-<unix_timestamp>`.
pub fn branch_name_for(prefix: &str, issue_number: u64, at: DateTime<Utc>) -> String {
    format!("{prefix}-{issue_number}-{}", at.timestamp())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchPreparation {
    /// Fresh branch cut from the updated base.
    Created { stashed_leftovers: bool },
    /// The branch already existed locally (a retry) and was checked out.
    Reused { stashed_leftovers: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed { sha: String },
    NoChanges,
}

#[derive(Debug, Clone)]
pub struct GitAutomation {
    git: GitCli,
    repo: RepoHandle,
    settings: GitSettings,
}

impl GitAutomation {
    /// Wrap a working tree rooted at `root` without probing it.
    pub fn new(root: impl Into<PathBuf>, git: GitCli, settings: GitSettings) -> Self {
        let root = root.into();
        let git_dir = root.join(".git");
        Self {
            git,
            repo: RepoHandle { root, git_dir },
            settings,
        }
    }

    pub async fn open(
        path: impl Into<PathBuf>,
        git: GitCli,
        settings: GitSettings,
    ) -> Result<Self, GitError> {
        let path = path.into();
        let repo = discover_repo(&path, &git).await?;
        Ok(Self {
            git,
            repo,
            settings,
        })
    }

    pub fn repo(&self) -> &RepoHandle {
        &self.repo
    }

    /// Confirm the root is still a git working tree.
    pub async fn check_repository(&self) -> Result<(), GitError> {
        discover_repo(&self.repo.root, &self.git).await.map(|_| ())
    }

    pub fn settings(&self) -> &GitSettings {
        &self.settings
    }

    pub fn branch_name(&self, issue_number: u64, at: DateTime<Utc>) -> String {
        branch_name_for(&self.settings.branch_prefix, issue_number, at)
    }

    pub async fn ensure_no_conflicts(&self) -> Result<(), GitError> {
        let paths = conflicted_paths(&self.repo, &self.git).await?;
        if paths.is_empty() {
            Ok(())
        } else {
            Err(GitError::Conflict { paths })
        }
    }

    /// Check out `branch`, creating it from the fast-forwarded base branch
    /// when it does not exist yet.
    ///
    /// Uncommitted leftovers from an earlier attempt are stashed first so
    /// they never leak into another task's branch.
    pub async fn create_feature_branch(&self, branch: &str) -> Result<BranchPreparation, GitError> {
        self.ensure_no_conflicts().await?;
        let stashed_leftovers = self.stash_leftovers(branch).await?;

        if branch_exists(&self.repo, &self.git, branch).await? {
            self.checkout(branch, &[branch]).await?;
            tracing::info!(branch, "reusing existing feature branch");
            return Ok(BranchPreparation::Reused { stashed_leftovers });
        }

        let base = self.settings.base_branch.as_str();
        let remote = self.settings.remote_name.as_str();

        self.checkout(branch, &[base]).await?;
        self.git
            .run(&self.repo.root, ["pull", "--ff-only", "--quiet", remote, base])
            .await
            .map_err(|err| GitError::Branch {
                branch: branch.to_string(),
                reason: format!(
                    "base branch {base} cannot be fast-forwarded from {remote}: {}",
                    err.detail()
                ),
            })?;
        self.checkout(branch, &["-b", branch]).await?;

        tracing::info!(branch, base, "created feature branch");
        Ok(BranchPreparation::Created { stashed_leftovers })
    }

    /// Stage everything and commit it; an empty diff is [`CommitOutcome::NoChanges`].
    pub async fn commit_changes(&self, message: &str) -> Result<CommitOutcome, GitError> {
        self.ensure_no_conflicts().await?;
        self.git.run(&self.repo.root, ["add", "-A"]).await?;

        let staged = self
            .git
            .probe(&self.repo.root, ["diff", "--cached", "--quiet"])
            .await?;
        match staged.status {
            Some(0) => return Ok(CommitOutcome::NoChanges),
            Some(1) => {}
            status => {
                return Err(GitError::CommandFailed {
                    command: staged.command,
                    status,
                    stdout: staged.stdout,
                    stderr: staged.stderr,
                })
            }
        }

        let mut args = self.identity_args();
        args.extend(["commit", "--quiet", "-m", message].map(str::to_string));
        self.git.run(&self.repo.root, args).await?;

        let sha = head_sha(&self.repo, &self.git).await?;
        tracing::info!(sha = %sha, "committed agent changes");
        Ok(CommitOutcome::Committed { sha })
    }

    /// Whether `HEAD` carries commits the base branch does not have.
    pub async fn has_commits_ahead_of_base(&self) -> Result<bool, GitError> {
        let count = commits_ahead(
            &self.repo,
            &self.git,
            &self.settings.base_branch,
            "HEAD",
        )
        .await?;
        Ok(count > 0)
    }

    pub async fn push(&self, branch: &str, cancel: &CancellationToken) -> Result<(), GitError> {
        let remote = self.settings.remote_name.as_str();
        let result = self
            .git
            .run_cancellable(
                &self.repo.root,
                ["push", "--set-upstream", remote, branch],
                cancel,
            )
            .await;

        match result {
            Ok(_) => {
                tracing::info!(branch, remote, "pushed feature branch");
                Ok(())
            }
            Err(GitError::CommandFailed { stderr, .. }) => {
                let cause = stderr.trim().to_string();
                Err(GitError::Push {
                    branch: branch.to_string(),
                    remote: remote.to_string(),
                    transient: is_transient_push_failure(&cause),
                    cause,
                })
            }
            Err(GitError::TimedOut { after, .. }) => Err(GitError::Push {
                branch: branch.to_string(),
                remote: remote.to_string(),
                cause: format!("push timed out after {after:?}"),
                transient: true,
            }),
            Err(other) => Err(other),
        }
    }

    fn identity_args(&self) -> Vec<String> {
        vec![
            "-c".to_string(),
            format!("user.name={}", self.settings.committer_name),
            "-c".to_string(),
            format!("user.email={}", self.settings.committer_email),
        ]
    }

    async fn checkout(&self, branch: &str, args: &[&str]) -> Result<(), GitError> {
        let mut full = vec!["checkout", "--quiet"];
        full.extend_from_slice(args);
        self.git
            .run(&self.repo.root, full)
            .await
            .map(|_| ())
            .map_err(|err| GitError::Branch {
                branch: branch.to_string(),
                reason: format!("checkout {} failed: {}", args.join(" "), err.detail()),
            })
    }

    async fn stash_leftovers(&self, branch: &str) -> Result<bool, GitError> {
        if !has_uncommitted_changes(&self.repo, &self.git).await? {
            return Ok(false);
        }
        let label = format!("relay: leftovers before {branch}");
        let mut args = self.identity_args();
        args.extend(
            ["stash", "push", "--include-untracked", "--quiet", "-m", label.as_str()].map(str::to_string),
        );
        self.git.run(&self.repo.root, args).await?;
        tracing::warn!(branch, "stashed uncommitted leftovers in working tree");
        Ok(true)
    }
}

const PERMANENT_PUSH_MARKERS: [&str; 7] = [
    "rejected",
    "non-fast-forward",
    "authentication failed",
    "permission denied",
    "permission to",
    "repository not found",
    "protected branch",
];

const TRANSIENT_PUSH_MARKERS: [&str; 14] = [
    "could not resolve host",
    "couldn't connect to server",
    "failed to connect",
    "connection timed out",
    "connection reset",
    "connection refused",
    "operation timed out",
    "network is unreachable",
    "temporary failure",
    "early eof",
    "the remote end hung up unexpectedly",
    "rpc failed",
    "the requested url returned error: 5",
    "gnutls recv error",
];

/// Classify a push failure from git's stderr.
///
/// Rejections and credential problems are permanent even when git also
/// reports a hang-up; only recognisable network failures are transient.
pub fn is_transient_push_failure(stderr: &str) -> bool {
    let lowered = stderr.to_ascii_lowercase();
    if PERMANENT_PUSH_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return false;
    }
    TRANSIENT_PUSH_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}
