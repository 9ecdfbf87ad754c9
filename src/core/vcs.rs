//! Thin git subprocess wrapper shared by the sandbox and branch engines.

use std::path::Path;
use std::process::Command;

use super::error::PhaserError;

fn run(root: &Path, args: &[&str]) -> Result<std::process::Output, PhaserError> {
    Command::new("git")
        .arg("-C")
        .arg(root)
        .args(args)
        .output()
        .map_err(PhaserError::IoError)
}

fn stdout_trimmed(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn is_git_repo(root: &Path) -> bool {
    match run(root, &["rev-parse", "--is-inside-work-tree"]) {
        Ok(out) => out.status.success() && stdout_trimmed(&out) == "true",
        Err(_) => false,
    }
}

pub fn get_current_branch(root: &Path) -> Result<String, PhaserError> {
    let out = run(root, &["branch", "--show-current"])?;
    let branch = stdout_trimmed(&out);
    if out.status.success() && !branch.is_empty() {
        return Ok(branch);
    }
    // Detached HEAD - fall back to the short commit hash.
    let out = run(root, &["rev-parse", "--short", "HEAD"])?;
    Ok(stdout_trimmed(&out))
}

pub fn has_uncommitted_changes(root: &Path) -> Result<bool, PhaserError> {
    let out = run(root, &["status", "--porcelain"])?;
    Ok(!stdout_trimmed(&out).is_empty())
}

pub fn branch_exists(root: &Path, branch: &str) -> Result<bool, PhaserError> {
    let out = run(
        root,
        &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
    )?;
    Ok(out.status.success())
}

pub fn create_branch(root: &Path, branch: &str, from: &str) -> Result<(), PhaserError> {
    let out = run(root, &["branch", branch, from])?;
    check(out, "create branch")
}

pub fn checkout_branch(root: &Path, branch: &str) -> Result<(), PhaserError> {
    let out = run(root, &["checkout", branch])?;
    check(out, "checkout branch")
}

pub fn checkout_new_branch(root: &Path, branch: &str, from: &str) -> Result<(), PhaserError> {
    let out = run(root, &["checkout", "-b", branch, from])?;
    check(out, "checkout new branch")
}

/// Stage everything and commit. Returns `None` if there was nothing to commit.
pub fn commit_all(root: &Path, message: &str) -> Result<Option<String>, PhaserError> {
    let out = run(root, &["add", "-A"])?;
    check(out, "stage changes")?;

    let status = run(root, &["status", "--porcelain"])?;
    if stdout_trimmed(&status).is_empty() {
        return Ok(None);
    }

    let out = run(root, &["commit", "-m", message])?;
    check(out, "commit")?;

    let rev = run(root, &["rev-parse", "HEAD"])?;
    Ok(Some(stdout_trimmed(&rev)))
}

pub fn delete_branch(root: &Path, branch: &str, force: bool) -> Result<(), PhaserError> {
    let flag = if force { "-D" } else { "-d" };
    let out = run(root, &["branch", flag, branch])?;
    check(out, "delete branch")
}

pub fn rebase_onto(root: &Path, target: &str) -> Result<(), PhaserError> {
    let out = run(root, &["rebase", target])?;
    check(out, "rebase")
}

pub fn merge_squash(root: &Path, source: &str) -> Result<(), PhaserError> {
    let out = run(root, &["merge", "--squash", source])?;
    check(out, "squash merge")
}

pub fn merge_no_ff(root: &Path, source: &str, message: &str) -> Result<(), PhaserError> {
    let out = run(root, &["merge", "--no-ff", "-m", message, source])?;
    check(out, "merge")
}

pub fn merge_ff_only(root: &Path, source: &str) -> Result<(), PhaserError> {
    let out = run(root, &["merge", "--ff-only", source])?;
    check(out, "fast-forward merge")
}

pub fn stash_push(root: &Path, message: &str) -> Result<Option<String>, PhaserError> {
    if !has_uncommitted_changes(root)? {
        return Ok(None);
    }
    let out = run(root, &["stash", "push", "-m", message])?;
    check(out, "stash push")?;

    let list = run(root, &["stash", "list", "-n", "1"])?;
    let line = stdout_trimmed(&list);
    Ok(Some(
        line.split(':').next().map(str::trim).unwrap_or("stash@{0}").to_string(),
    ))
}

pub fn stash_pop(root: &Path, stash_ref: &str) -> Result<bool, PhaserError> {
    let out = run(root, &["stash", "pop", stash_ref])?;
    Ok(out.status.success())
}

pub fn stash_drop(root: &Path, stash_ref: &str) -> Result<bool, PhaserError> {
    let out = run(root, &["stash", "drop", stash_ref])?;
    Ok(out.status.success())
}

pub fn checkout_file(root: &Path, rel_path: &str) -> Result<bool, PhaserError> {
    let out = run(root, &["checkout", "--", rel_path])?;
    Ok(out.status.success())
}

fn check(output: std::process::Output, action: &str) -> Result<(), PhaserError> {
    if output.status.success() {
        Ok(())
    } else {
        Err(PhaserError::GitError(format!(
            "{action} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::tempdir;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        StdCommand::new("git").args(["init", "-q"]).current_dir(dir.path()).output().unwrap();
        StdCommand::new("git")
            .args(["config", "user.email", "t@example.com"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.name", "Tester"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        commit_all(dir.path(), "init").unwrap();
        dir
    }

    #[test]
    fn detects_git_repo_and_branch() {
        let dir = init_repo();
        assert!(is_git_repo(dir.path()));
        let branch = get_current_branch(dir.path()).unwrap();
        assert!(branch == "main" || branch == "master");
    }

    #[test]
    fn commit_all_returns_none_when_nothing_to_commit() {
        let dir = init_repo();
        let result = commit_all(dir.path(), "noop").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn create_and_delete_branch_roundtrip() {
        let dir = init_repo();
        let current = get_current_branch(dir.path()).unwrap();
        create_branch(dir.path(), "feature", &current).unwrap();
        assert!(branch_exists(dir.path(), "feature").unwrap());
        delete_branch(dir.path(), "feature", false).unwrap();
        assert!(!branch_exists(dir.path(), "feature").unwrap());
    }
}
