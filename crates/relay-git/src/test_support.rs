//! Throwaway repositories for tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub fn git_ok(cwd: &Path, args: &[&str]) -> String {
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

/// Initialise `<parent>/work` on branch `main` with a local identity.
pub fn init_repo(parent: &Path, with_commit: bool) -> PathBuf {
    let root = parent.join("work");
    fs::create_dir_all(&root).expect("create repo dir");
    git_ok(&root, &["init", "--quiet"]);
    git_ok(&root, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git_ok(&root, &["config", "user.name", "Test User"]);
    git_ok(&root, &["config", "user.email", "test@example.com"]);
    git_ok(&root, &["config", "commit.gpgsign", "false"]);

    if with_commit {
        fs::write(root.join("README.md"), "init\n").expect("write file");
        git_ok(&root, &["add", "README.md"]);
        git_ok(&root, &["commit", "--quiet", "-m", "init"]);
    }

    root
}

/// A bare `<parent>/remote.git` plus a `<parent>/work` clone tracking it as `origin`.
pub fn init_repo_with_remote(parent: &Path) -> (PathBuf, PathBuf) {
    let remote = parent.join("remote.git");
    fs::create_dir_all(&remote).expect("create remote dir");
    git_ok(&remote, &["init", "--bare", "--quiet"]);
    git_ok(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

    let work = init_repo(parent, true);
    let remote_str = remote.to_string_lossy().into_owned();
    git_ok(&work, &["remote", "add", "origin", &remote_str]);
    git_ok(&work, &["push", "--quiet", "-u", "origin", "main"]);

    (remote, work)
}
