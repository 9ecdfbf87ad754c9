//! Branch engine: runs each audit phase on its own git branch, chained off
//! the previous phase, so a phase can be inspected or reverted in isolation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::PhaserError;
use crate::core::time::now_iso_millis;
use crate::core::vcs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Squash,
    Rebase,
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub phase_num: u32,
    pub phase_slug: String,
    pub branch_name: String,
    pub created_at: String,
    pub commit_sha: Option<String>,
    pub merged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchContext {
    pub audit_id: String,
    pub audit_slug: String,
    pub root: PathBuf,
    pub base_branch: String,
    pub current_phase: Option<u32>,
    pub branches: Vec<BranchInfo>,
    pub active: bool,
}

impl BranchContext {
    pub fn get_branch(&self, phase_num: u32) -> Option<&BranchInfo> {
        self.branches.iter().find(|b| b.phase_num == phase_num)
    }

    pub fn current_branch_name(&self) -> Option<&str> {
        self.current_phase
            .and_then(|phase| self.get_branch(phase))
            .map(|b| b.branch_name.as_str())
    }

    pub fn last_branch_name(&self) -> Option<&str> {
        self.branches.last().map(|b| b.branch_name.as_str())
    }
}

fn branches_path(root: &Path) -> PathBuf {
    root.join(".phaser").join("branches.yaml")
}

fn save_context(ctx: &BranchContext) -> Result<(), PhaserError> {
    let path = branches_path(&ctx.root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_yaml::to_string(ctx)?)?;
    Ok(())
}

fn load_context(root: &Path) -> Result<Option<BranchContext>, PhaserError> {
    let path = branches_path(root);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_yaml::from_str(&raw)?))
}

fn remove_context(root: &Path) -> Result<(), PhaserError> {
    let path = branches_path(root);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

pub fn branch_name_for(audit_slug: &str, phase_num: u32, phase_slug: &str) -> String {
    format!("audit/{audit_slug}/phase-{phase_num:02}-{phase_slug}")
}

/// Enable branch mode: records the base branch and refuses to start over a
/// dirty tree or an already-active session.
pub fn begin_branch_mode(
    root: &Path,
    audit_id: &str,
    audit_slug: &str,
) -> Result<BranchContext, PhaserError> {
    let root = root
        .canonicalize()
        .map_err(|e| PhaserError::PathError(format!("cannot resolve {}: {e}", root.display())))?;

    if !vcs::is_git_repo(&root) {
        return Err(PhaserError::BranchError(format!(
            "not a git repository: {}",
            root.display()
        )));
    }

    if let Some(existing) = load_context(&root)? {
        if existing.active {
            return Err(PhaserError::BranchError(format!(
                "branch mode already active for audit: {}",
                existing.audit_id
            )));
        }
    }

    if vcs::has_uncommitted_changes(&root)? {
        return Err(PhaserError::BranchError(
            "working tree has uncommitted changes".to_string(),
        ));
    }

    let base_branch = vcs::get_current_branch(&root)?;

    let ctx = BranchContext {
        audit_id: audit_id.to_string(),
        audit_slug: audit_slug.to_string(),
        root,
        base_branch,
        current_phase: None,
        branches: Vec::new(),
        active: true,
    };
    save_context(&ctx)?;
    Ok(ctx)
}

/// Create and check out a branch for `phase_num`, branching from the
/// previous phase's branch or the base branch if this is the first phase.
pub fn create_phase_branch(
    ctx: &mut BranchContext,
    phase_num: u32,
    phase_slug: &str,
) -> Result<BranchInfo, PhaserError> {
    let branch_name = branch_name_for(&ctx.audit_slug, phase_num, phase_slug);

    if vcs::branch_exists(&ctx.root, &branch_name)? {
        return Err(PhaserError::BranchError(format!(
            "branch already exists: {branch_name}"
        )));
    }

    let from = ctx
        .branches
        .last()
        .map(|b| b.branch_name.clone())
        .unwrap_or_else(|| ctx.base_branch.clone());

    vcs::checkout_new_branch(&ctx.root, &branch_name, &from)?;

    let info = BranchInfo {
        phase_num,
        phase_slug: phase_slug.to_string(),
        branch_name,
        created_at: now_iso_millis(),
        commit_sha: None,
        merged: false,
    };
    ctx.branches.push(info.clone());
    ctx.current_phase = Some(phase_num);
    save_context(ctx)?;
    Ok(info)
}

/// Commit whatever the phase changed on its branch, recording the commit SHA.
pub fn commit_phase(
    ctx: &mut BranchContext,
    phase_num: u32,
    message: &str,
) -> Result<Option<String>, PhaserError> {
    let sha = vcs::commit_all(&ctx.root, message)?;
    if let Some(info) = ctx.branches.iter_mut().find(|b| b.phase_num == phase_num) {
        info.commit_sha = sha.clone();
    }
    save_context(ctx)?;
    Ok(sha)
}

/// Merge the full phase chain back into `target` using `strategy`. Because
/// each phase branches from the one before it, the last branch already
/// contains every prior phase's changes — only it needs merging.
pub fn merge_all_branches(
    ctx: &mut BranchContext,
    target: &str,
    strategy: MergeStrategy,
) -> Result<(), PhaserError> {
    let Some(last) = ctx.branches.last().map(|b| b.branch_name.clone()) else {
        return Ok(());
    };

    vcs::checkout_branch(&ctx.root, target)?;

    match strategy {
        MergeStrategy::Squash => {
            vcs::merge_squash(&ctx.root, &last)?;
            vcs::commit_all(&ctx.root, &format!("Merge audit branches into {target}"))?;
        }
        MergeStrategy::Rebase => {
            vcs::checkout_branch(&ctx.root, &last)?;
            vcs::rebase_onto(&ctx.root, target)?;
            vcs::checkout_branch(&ctx.root, target)?;
            vcs::merge_ff_only(&ctx.root, &last)?;
        }
        MergeStrategy::Merge => {
            vcs::merge_no_ff(&ctx.root, &last, &format!("Merge audit branches into {target}"))?;
        }
    }

    for info in &mut ctx.branches {
        info.merged = true;
    }
    save_context(ctx)
}

/// Delete every phase branch. Always force-deletes: a squash merge never
/// registers as "merged" to git, so `merged` on `BranchInfo` is the source
/// of truth instead.
pub fn cleanup_branches(ctx: &mut BranchContext) -> Result<(), PhaserError> {
    for info in &ctx.branches {
        let _ = vcs::delete_branch(&ctx.root, &info.branch_name, true);
    }
    ctx.branches.clear();
    ctx.current_phase = None;
    save_context(ctx)
}

pub fn get_branch_context(root: &Path) -> Result<Option<BranchContext>, PhaserError> {
    Ok(load_context(root)?.filter(|ctx| ctx.active))
}

pub fn end_branch_mode(ctx: &mut BranchContext) -> Result<(), PhaserError> {
    ctx.active = false;
    remove_context(&ctx.root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::tempdir;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        Command::new("git").args(["init", "-q", "-b", "main"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["config", "user.email", "t@example.com"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        Command::new("git")
            .args(["config", "user.name", "Tester"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        vcs::commit_all(dir.path(), "init").unwrap();
        dir
    }

    #[test]
    fn begin_rejects_dirty_tree() {
        let dir = init_repo();
        std::fs::write(dir.path().join("dirty.txt"), "x").unwrap();
        let err = begin_branch_mode(dir.path(), "a1", "fix-auth").unwrap_err();
        assert!(matches!(err, PhaserError::BranchError(_)));
    }

    #[test]
    fn phase_branches_chain_off_each_other() {
        let dir = init_repo();
        let mut ctx = begin_branch_mode(dir.path(), "a1", "fix-auth").unwrap();

        create_phase_branch(&mut ctx, 1, "setup").unwrap();
        std::fs::write(dir.path().join("p1.txt"), "one").unwrap();
        commit_phase(&mut ctx, 1, "phase 1").unwrap();

        create_phase_branch(&mut ctx, 2, "implement").unwrap();
        assert!(dir.path().join("p1.txt").exists());

        assert_eq!(ctx.branches.len(), 2);
        assert_eq!(
            ctx.branches[1].branch_name,
            "audit/fix-auth/phase-02-implement"
        );
    }

    #[test]
    fn merge_all_squash_brings_changes_into_target() {
        let dir = init_repo();
        let mut ctx = begin_branch_mode(dir.path(), "a1", "fix-auth").unwrap();

        create_phase_branch(&mut ctx, 1, "setup").unwrap();
        std::fs::write(dir.path().join("p1.txt"), "one").unwrap();
        commit_phase(&mut ctx, 1, "phase 1").unwrap();

        merge_all_branches(&mut ctx, "main", MergeStrategy::Squash).unwrap();

        assert!(dir.path().join("p1.txt").exists());
        assert!(ctx.branches[0].merged);
    }

    #[test]
    fn cleanup_force_deletes_all_phase_branches() {
        let dir = init_repo();
        let mut ctx = begin_branch_mode(dir.path(), "a1", "fix-auth").unwrap();
        create_phase_branch(&mut ctx, 1, "setup").unwrap();
        let branch_name = ctx.branches[0].branch_name.clone();

        merge_all_branches(&mut ctx, "main", MergeStrategy::Squash).unwrap();
        cleanup_branches(&mut ctx).unwrap();

        assert!(!vcs::branch_exists(dir.path(), &branch_name).unwrap());
        assert!(ctx.branches.is_empty());
    }
}
