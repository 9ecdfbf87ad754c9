//! Sandbox engine: runs audit phases against the real working tree while
//! keeping every change reversible until explicitly committed.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::PhaserError;
use crate::core::time::now_iso_millis;
use crate::core::vcs;

/// Kind of file change tracked during a sandbox session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxContext {
    pub audit_id: String,
    pub root: PathBuf,
    pub original_branch: String,
    pub stash_ref: Option<String>,
    pub created_files: Vec<String>,
    pub modified_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub started_at: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    pub success: bool,
    pub phases_run: usize,
    pub phases_passed: usize,
    pub phases_failed: usize,
    pub first_failure: Option<u32>,
    pub failure_reason: Option<String>,
    pub diff_summary: String,
    pub files_created: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
}

impl SandboxResult {
    pub fn summary(&self) -> String {
        let status = if self.success { "SUCCESS" } else { "FAILED" };
        let mut lines = vec![
            format!("Sandbox run {status}"),
            format!("Phases: {}/{} passed", self.phases_passed, self.phases_run),
        ];
        if let Some(phase) = self.first_failure {
            lines.push(format!("First failure: Phase {phase}"));
            if let Some(reason) = &self.failure_reason {
                lines.push(format!("Reason: {reason}"));
            }
        }
        lines.push(format!("Would create {} files", self.files_created));
        lines.push(format!("Would modify {} files", self.files_modified));
        lines.push(format!("Would delete {} files", self.files_deleted));
        lines.join("\n")
    }
}

fn sandbox_path(root: &Path) -> PathBuf {
    root.join(".phaser").join("simulation.yaml")
}

fn save_context(ctx: &SandboxContext) -> Result<(), PhaserError> {
    let path = sandbox_path(&ctx.root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_yaml::to_string(ctx)?)?;
    Ok(())
}

fn load_context(root: &Path) -> Result<Option<SandboxContext>, PhaserError> {
    let path = sandbox_path(root);
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
    let path = sandbox_path(root);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

/// Begin a sandbox session: stashes uncommitted work so the session starts
/// from a clean tree, then tracks every subsequent change for rollback.
pub fn begin_sandbox(root: &Path, audit_id: &str) -> Result<SandboxContext, PhaserError> {
    let root = root
        .canonicalize()
        .map_err(|e| PhaserError::PathError(format!("cannot resolve {}: {e}", root.display())))?;

    if !vcs::is_git_repo(&root) {
        return Err(PhaserError::SandboxError(format!(
            "not a git repository: {}",
            root.display()
        )));
    }

    if let Some(existing) = load_context(&root)? {
        if existing.active {
            return Err(PhaserError::SandboxError(format!(
                "sandbox already active for audit: {}",
                existing.audit_id
            )));
        }
    }

    let original_branch = vcs::get_current_branch(&root)?;
    let stash_ref = vcs::stash_push(&root, &format!("phaser-sandbox-{audit_id}"))?;

    let ctx = SandboxContext {
        audit_id: audit_id.to_string(),
        root,
        original_branch,
        stash_ref,
        created_files: Vec::new(),
        modified_files: Vec::new(),
        deleted_files: Vec::new(),
        started_at: now_iso_millis(),
        active: true,
    };
    save_context(&ctx)?;
    Ok(ctx)
}

/// Record a file change against an active sandbox context, persisting the
/// update immediately so a crash mid-audit can still be rolled back.
pub fn track_file_change(
    ctx: &mut SandboxContext,
    path: &Path,
    kind: ChangeKind,
) -> Result<(), PhaserError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        ctx.root.join(path)
    };
    let Ok(rel) = absolute.strip_prefix(&ctx.root) else {
        return Ok(());
    };
    let rel = rel.to_string_lossy().replace('\\', "/");

    let bucket = match kind {
        ChangeKind::Created => &mut ctx.created_files,
        ChangeKind::Modified => &mut ctx.modified_files,
        ChangeKind::Deleted => &mut ctx.deleted_files,
    };
    if !bucket.contains(&rel) {
        bucket.push(rel);
    }
    save_context(ctx)
}

/// Undo every tracked change and restore the original working tree, in the
/// order: delete created files, restore modified/deleted files from git,
/// then pop the stash.
pub fn rollback_sandbox(ctx: &mut SandboxContext) -> Result<bool, PhaserError> {
    if !ctx.active {
        return Ok(true);
    }

    let mut success = true;

    for rel in &ctx.created_files {
        let full_path = ctx.root.join(rel);
        if full_path.exists() {
            if std::fs::remove_file(&full_path).is_err() {
                success = false;
                continue;
            }
            let mut parent = full_path.parent();
            while let Some(dir) = parent {
                if dir == ctx.root {
                    break;
                }
                if dir.read_dir().map(|mut d| d.next().is_none()).unwrap_or(false) {
                    let _ = std::fs::remove_dir(dir);
                }
                parent = dir.parent();
            }
        }
    }

    for rel in ctx.modified_files.iter().chain(ctx.deleted_files.iter()) {
        if !vcs::checkout_file(&ctx.root, rel)? {
            success = false;
        }
    }

    if let Some(stash_ref) = &ctx.stash_ref {
        if !vcs::stash_pop(&ctx.root, stash_ref)? {
            success = false;
        }
    }

    ctx.active = false;
    remove_context(&ctx.root)?;
    Ok(success)
}

/// Keep every tracked change: drops the stash instead of restoring it.
pub fn commit_sandbox(ctx: &mut SandboxContext) -> Result<(), PhaserError> {
    if !ctx.active {
        return Ok(());
    }
    if let Some(stash_ref) = &ctx.stash_ref {
        vcs::stash_drop(&ctx.root, stash_ref)?;
    }
    ctx.active = false;
    remove_context(&ctx.root)
}

pub fn get_active_sandbox(root: &Path) -> Result<Option<SandboxContext>, PhaserError> {
    Ok(load_context(root)?.filter(|ctx| ctx.active))
}

/// RAII guard over a sandbox session: rolls back on drop unless `commit` is
/// called, which consumes the guard and keeps the changes.
pub struct SandboxGuard {
    ctx: Option<SandboxContext>,
}

impl SandboxGuard {
    pub fn begin(root: &Path, audit_id: &str) -> Result<Self, PhaserError> {
        Ok(Self {
            ctx: Some(begin_sandbox(root, audit_id)?),
        })
    }

    pub fn context(&self) -> &SandboxContext {
        self.ctx.as_ref().expect("context taken")
    }

    pub fn track(&mut self, path: &Path, kind: ChangeKind) -> Result<(), PhaserError> {
        track_file_change(self.ctx.as_mut().expect("context taken"), path, kind)
    }

    /// Consume the guard, keeping all tracked changes instead of rolling
    /// them back.
    pub fn commit(mut self) -> Result<(), PhaserError> {
        let mut ctx = self.ctx.take().expect("context taken");
        commit_sandbox(&mut ctx)
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            let _ = rollback_sandbox(&mut ctx);
        }
    }
}
