//! Audit orchestrator: runs a sequence of phases in one of three modes —
//! direct (permanent), sandboxed (auto-rollback), or branched (one branch
//! per phase) — delegating actual phase work to a `PhaseExecutor`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::error::PhaserError;
use crate::core::events::EventEmitter;
use crate::plugins::branches::{self, BranchContext, MergeStrategy};
use crate::plugins::sandbox::{self, ChangeKind, SandboxContext};

#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase_num: u32,
    pub description: String,
    pub success: bool,
    pub duration_secs: f64,
    pub error: Option<String>,
    pub files_changed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AuditRunConfig {
    pub root: PathBuf,
    pub audit_id: String,
    pub audit_slug: String,
    pub simulate: bool,
    pub branch_mode: bool,
    pub phases: Vec<u32>,
    pub fail_fast: bool,
}

impl AuditRunConfig {
    pub fn new(root: PathBuf, audit_id: impl Into<String>, phases: Vec<u32>) -> Self {
        let audit_id = audit_id.into();
        Self {
            root,
            audit_slug: audit_id.clone(),
            audit_id,
            simulate: false,
            branch_mode: false,
            phases,
            fail_fast: true,
        }
    }
}

/// Executes a single phase's work. The default `NoopExecutor` always
/// succeeds immediately; real phase bodies (reading `.audit/phases/*.md`,
/// running verification) are supplied by the caller.
pub trait PhaseExecutor {
    fn execute(&mut self, phase_num: u32) -> Result<Vec<String>, String>;

    fn phase_slug(&self, phase_num: u32) -> String {
        format!("phase-{phase_num:02}")
    }

    fn phase_description(&self, phase_num: u32) -> String {
        format!("Phase {phase_num}")
    }
}

pub struct NoopExecutor;

impl PhaseExecutor for NoopExecutor {
    fn execute(&mut self, _phase_num: u32) -> Result<Vec<String>, String> {
        Ok(Vec::new())
    }
}

pub struct AuditRunner<'a, E: PhaseExecutor> {
    config: AuditRunConfig,
    executor: E,
    emitter: Option<&'a EventEmitter>,
    sandbox_ctx: Option<SandboxContext>,
    branch_ctx: Option<BranchContext>,
}

impl<'a, E: PhaseExecutor> AuditRunner<'a, E> {
    pub fn new(config: AuditRunConfig, executor: E) -> Self {
        Self {
            config,
            executor,
            emitter: None,
            sandbox_ctx: None,
            branch_ctx: None,
        }
    }

    pub fn with_emitter(mut self, emitter: &'a EventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn run(&mut self) -> Result<Vec<PhaseResult>, PhaserError> {
        if self.config.simulate {
            self.run_sandboxed()
        } else if self.config.branch_mode {
            self.run_branched()
        } else {
            self.run_direct()
        }
    }

    fn run_direct(&mut self) -> Result<Vec<PhaseResult>, PhaserError> {
        self.execute_phases()
    }

    fn run_sandboxed(&mut self) -> Result<Vec<PhaseResult>, PhaserError> {
        let ctx = sandbox::begin_sandbox(&self.config.root, &self.config.audit_id)?;
        self.sandbox_ctx = Some(ctx);

        let results = self.execute_phases();

        if let Some(mut ctx) = self.sandbox_ctx.take() {
            sandbox::rollback_sandbox(&mut ctx)?;
        }
        results
    }

    fn run_branched(&mut self) -> Result<Vec<PhaseResult>, PhaserError> {
        let ctx = branches::begin_branch_mode(
            &self.config.root,
            &self.config.audit_id,
            &self.config.audit_slug,
        )?;
        self.branch_ctx = Some(ctx);

        let mut results = Vec::new();
        let phases = self.config.phases.clone();

        for phase_num in phases {
            let phase_slug = self.executor.phase_slug(phase_num);
            {
                let ctx = self.branch_ctx.as_mut().expect("branch ctx set above");
                branches::create_phase_branch(ctx, phase_num, &phase_slug)?;
            }

            let result = self.execute_single_phase(phase_num);
            let success = result.success;
            results.push(result);

            if success {
                let ctx = self.branch_ctx.as_mut().expect("branch ctx set above");
                branches::commit_phase(ctx, phase_num, &format!("Phase {phase_num}: {phase_slug}"))?;
            } else if self.config.fail_fast {
                break;
            }
        }

        Ok(results)
    }

    fn execute_phases(&mut self) -> Result<Vec<PhaseResult>, PhaserError> {
        let mut results = Vec::new();
        let phases = self.config.phases.clone();

        for phase_num in phases {
            let result = self.execute_single_phase(phase_num);
            let failed = !result.success;
            results.push(result);

            if failed && self.config.fail_fast {
                break;
            }
        }
        Ok(results)
    }

    fn execute_single_phase(&mut self, phase_num: u32) -> PhaseResult {
        let description = self.executor.phase_description(phase_num);
        let start = Instant::now();

        match self.executor.execute(phase_num) {
            Ok(files_changed) => {
                if let Some(ctx) = self.sandbox_ctx.as_mut() {
                    for file in &files_changed {
                        let _ = sandbox::track_file_change(
                            ctx,
                            Path::new(file),
                            ChangeKind::Modified,
                        );
                    }
                }
                PhaseResult {
                    phase_num,
                    description,
                    success: true,
                    duration_secs: start.elapsed().as_secs_f64(),
                    error: None,
                    files_changed,
                }
            }
            Err(error) => PhaseResult {
                phase_num,
                description,
                success: false,
                duration_secs: start.elapsed().as_secs_f64(),
                error: Some(error),
                files_changed: Vec::new(),
            },
        }
    }

    /// Track a file change while in sandbox mode; no-op otherwise.
    pub fn track_file(&mut self, path: &Path, kind: ChangeKind) -> Result<(), PhaserError> {
        if let Some(ctx) = self.sandbox_ctx.as_mut() {
            sandbox::track_file_change(ctx, path, kind)
        } else {
            Ok(())
        }
    }

    pub fn sandbox_summary(&self) -> Option<String> {
        let ctx = self.sandbox_ctx.as_ref()?;
        let mut parts = Vec::new();
        if !ctx.created_files.is_empty() {
            parts.push(format!("+{} created", ctx.created_files.len()));
        }
        if !ctx.modified_files.is_empty() {
            parts.push(format!("~{} modified", ctx.modified_files.len()));
        }
        if !ctx.deleted_files.is_empty() {
            parts.push(format!("-{} deleted", ctx.deleted_files.len()));
        }
        Some(if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        })
    }

    /// Keep sandbox changes instead of rolling them back. Only meaningful
    /// after a `simulate` run that the caller decided to promote.
    pub fn commit_sandbox_changes(&mut self) -> Result<bool, PhaserError> {
        match self.sandbox_ctx.take() {
            Some(mut ctx) => {
                sandbox::commit_sandbox(&mut ctx)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn merge_and_cleanup(&mut self, target: &str, strategy: MergeStrategy) -> Result<(), PhaserError> {
        let Some(ctx) = self.branch_ctx.as_mut() else {
            return Ok(());
        };
        branches::merge_all_branches(ctx, target, strategy)?;
        branches::cleanup_branches(ctx)?;
        branches::end_branch_mode(ctx)
    }
}

pub fn run_audit(
    root: &Path,
    audit_id: &str,
    phases: Vec<u32>,
    simulate: bool,
    branch_mode: bool,
) -> Result<Vec<PhaseResult>, PhaserError> {
    let mut config = AuditRunConfig::new(root.to_path_buf(), audit_id, phases);
    config.simulate = simulate;
    config.branch_mode = branch_mode;

    let mut runner = AuditRunner::new(config, NoopExecutor);
    runner.run()
}

pub fn simulate_phases(
    root: &Path,
    audit_id: &str,
    phases: Vec<u32>,
) -> Result<(Vec<PhaseResult>, String), PhaserError> {
    let mut config = AuditRunConfig::new(root.to_path_buf(), audit_id, phases);
    config.simulate = true;

    let mut runner = AuditRunner::new(config, NoopExecutor);
    let results = runner.run()?;
    let summary = runner.sandbox_summary().unwrap_or_else(|| "No changes".to_string());
    Ok((results, summary))
}
