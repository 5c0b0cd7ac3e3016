use std::path::{Path, PathBuf};

use crate::command::GitCli;
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub root: PathBuf,
    pub git_dir: PathBuf,
}

pub async fn discover_repo(start_path: &Path, git: &GitCli) -> Result<RepoHandle, GitError> {
    let inside = match git
        .run(start_path, ["rev-parse", "--is-inside-work-tree"])
        .await
    {
        Ok(output) => output.stdout.trim().eq("true"),
        Err(GitError::CommandFailed { .. }) => false,
        Err(err) => return Err(err),
    };

    if !inside {
        return Err(GitError::NotARepository {
            path: start_path.to_path_buf(),
        });
    }

    let root_raw = git.run(start_path, ["rev-parse", "--show-toplevel"]).await?;
    let root = PathBuf::from(root_raw.stdout.trim());

    let git_dir_raw = git.run(&root, ["rev-parse", "--git-dir"]).await?;
    let git_dir_rel = PathBuf::from(git_dir_raw.stdout.trim());
    let git_dir = if git_dir_rel.is_absolute() {
        git_dir_rel
    } else {
        root.join(git_dir_rel)
    };

    Ok(RepoHandle { root, git_dir })
}

pub async fn head_sha(repo: &RepoHandle, git: &GitCli) -> Result<String, GitError> {
    let output = git.run(&repo.root, ["rev-parse", "HEAD"]).await?;
    Ok(output.stdout.trim().to_string())
}

/// Check if the worktree has uncommitted changes (staged, unstaged or untracked).
pub async fn has_uncommitted_changes(repo: &RepoHandle, git: &GitCli) -> Result<bool, GitError> {
    let output = git.run(&repo.root, ["status", "--porcelain"]).await?;
    Ok(!output.stdout.trim().is_empty())
}

pub async fn branch_exists(
    repo: &RepoHandle,
    git: &GitCli,
    branch: &str,
) -> Result<bool, GitError> {
    let reference = format!("refs/heads/{branch}");
    let exit = git
        .probe(&repo.root, ["show-ref", "--verify", "--quiet", &reference])
        .await?;
    Ok(exit.success())
}

/// Paths git currently reports as unmerged.
pub async fn conflicted_paths(repo: &RepoHandle, git: &GitCli) -> Result<Vec<String>, GitError> {
    let output = git
        .run(&repo.root, ["diff", "--name-only", "--diff-filter=U"])
        .await?;
    Ok(output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Number of commits reachable from `head` but not from `base`.
pub async fn commits_ahead(
    repo: &RepoHandle,
    git: &GitCli,
    base: &str,
    head: &str,
) -> Result<u64, GitError> {
    let range = format!("{base}..{head}");
    let output = git
        .run(&repo.root, ["rev-list", "--count", &range])
        .await?;
    output
        .stdout
        .trim()
        .parse::<u64>()
        .map_err(|_| GitError::Parse {
            context: format!("expected commit count from rev-list, got '{}'", output.stdout.trim()),
        })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::{git_ok, init_repo};

    #[tokio::test]
    async fn discover_repo_finds_root_from_nested_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = init_repo(dir.path(), false);
        let nested = root.join("a").join("b");
        fs::create_dir_all(&nested).expect("create nested dir");

        let git = GitCli::default();
        let repo = discover_repo(&nested, &git).await.expect("discover repo");

        assert_eq!(
            repo.root.canonicalize().expect("canonical root"),
            root.canonicalize().expect("canonical root")
        );
        assert!(repo.git_dir.ends_with(".git"));
    }

    #[tokio::test]
    async fn discover_repo_returns_not_a_repository_for_plain_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = GitCli::default();
        let err = discover_repo(dir.path(), &git)
            .await
            .expect_err("expected not a repository");
        assert!(matches!(err, GitError::NotARepository { path } if path == dir.path()));
    }

    #[tokio::test]
    async fn branch_and_change_probes_reflect_repository_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = init_repo(dir.path(), true);
        let git = GitCli::default();
        let repo = discover_repo(&root, &git).await.expect("discover repo");

        let sha = head_sha(&repo, &git).await.expect("head sha");
        assert_eq!(sha.len(), 40);

        assert!(branch_exists(&repo, &git, "main").await.expect("probe"));
        assert!(!branch_exists(&repo, &git, "nope").await.expect("probe"));

        assert!(!has_uncommitted_changes(&repo, &git).await.expect("status"));
        fs::write(root.join("new.txt"), "hello\n").expect("write file");
        assert!(has_uncommitted_changes(&repo, &git).await.expect("status"));
    }

    #[tokio::test]
    async fn commits_ahead_counts_branch_only_commits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = init_repo(dir.path(), true);
        let git = GitCli::default();
        let repo = discover_repo(&root, &git).await.expect("discover repo");

        git_ok(&root, &["checkout", "-b", "topic"]);
        assert_eq!(
            commits_ahead(&repo, &git, "main", "HEAD").await.expect("count"),
            0
        );

        fs::write(root.join("topic.txt"), "topic\n").expect("write file");
        git_ok(&root, &["add", "-A"]);
        git_ok(&root, &["commit", "-m", "topic work"]);
        assert_eq!(
            commits_ahead(&repo, &git, "main", "HEAD").await.expect("count"),
            1
        );
    }

    #[tokio::test]
    async fn conflicted_paths_lists_unmerged_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = init_repo(dir.path(), true);
        let git = GitCli::default();
        let repo = discover_repo(&root, &git).await.expect("discover repo");

        git_ok(&root, &["checkout", "-b", "left"]);
        fs::write(root.join("README.md"), "left\n").expect("write");
        git_ok(&root, &["commit", "-am", "left"]);
        git_ok(&root, &["checkout", "main"]);
        fs::write(root.join("README.md"), "right\n").expect("write");
        git_ok(&root, &["commit", "-am", "right"]);

        assert!(conflicted_paths(&repo, &git).await.expect("diff").is_empty());

        let merge = std::process::Command::new("git")
            .args(["merge", "left"])
            .current_dir(&root)
            .output()
            .expect("spawn merge");
        assert!(!merge.status.success());

        let paths = conflicted_paths(&repo, &git).await.expect("diff");
        assert_eq!(paths, vec!["README.md".to_string()]);
    }
}
