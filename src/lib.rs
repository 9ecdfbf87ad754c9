//! Phaser: an audit-automation substrate for AI-assisted coding workflows
//!
//! **Phaser snapshots a workspace, checks it against contracts, runs phased
//! audits in a sandbox or branch chain, and enforces contracts at tool-call
//! time.**
//!
//! # For AI Agents
//!
//! **You MUST:**
//! 1. Capture a manifest before and after an audit: `phaser diff capture`
//! 2. Run phases in a sandbox or branch chain, never directly against a
//!    dirty tree: `phaser simulate run` / `phaser branches enable`
//! 3. Check contracts before declaring an audit complete: `phaser check`
//! 4. Route tool calls through the enforcement gate: `phaser enforce --stdin`
//!
//! # Architecture
//!
//! ## Store
//!
//! All persistent state — audits, events, config, contracts, manifests —
//! lives under a resolved `.phaser/` directory: an explicit
//! `PHASER_STORAGE_DIR` override, else the nearest project-local `.phaser/`
//! found walking up from the current directory, else `~/.phaser/`.
//!
//! ## Subsystems
//!
//! - `core::manifest`/`core::diff`: content-addressed snapshot/diff engine
//! - `plugins::contracts`/`plugins::contract_loader`: the rule engine, in
//!   its two shapes (audit-origin nested, enforcement-time flat)
//! - `plugins::ignore`: inline suppression directives
//! - `plugins::sandbox`: git-stash-backed dry-run execution scope
//! - `plugins::branches`: one git branch per audit phase
//! - `plugins::orchestrator`: ties phase execution to a run mode
//! - `plugins::enforce`: the Claude Code hook-based enforcement gate
//! - `plugins::serialize`: a dependency-free workspace-to-YAML serializer
//!
//! # Examples
//!
//! ```bash
//! # Capture a pre-audit manifest
//! phaser diff capture . --audit my-audit --stage pre
//!
//! # Check the workspace against every enabled contract
//! phaser check
//!
//! # Enforce contracts on a proposed tool call
//! echo '{"tool_name":"Write",...}' | phaser enforce --stdin
//! ```

pub mod cli;
pub mod core;
pub mod plugins;

use std::path::{Path, PathBuf};

use clap::Parser;
use colored::Colorize;

use cli::{
    BranchesCommand, Cli, Command, ContractsCommand, DiffCommand, EnforceCli, SimulateCommand,
};
use core::error::PhaserError;
use core::store::{self, Store};

/// Central dispatch: parse CLI args, resolve the store root, run the
/// requested subcommand. `main.rs` only translates the `Result` to an exit
/// code.
pub fn run() -> Result<(), PhaserError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("phaser {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Info => run_info(),
        Command::Diff(diff_cli) => run_diff(diff_cli.command),
        Command::Manifest { path, audit } => run_diff(DiffCommand::Capture {
            path,
            audit,
            stage: "pre".to_string(),
        }),
        Command::Contracts(contracts_cli) => run_contracts(contracts_cli.command),
        Command::Simulate(simulate_cli) => run_simulate(simulate_cli.command),
        Command::Branches(branches_cli) => run_branches(branches_cli.command),
        Command::Check { fail_on_error, format } => run_check(fail_on_error, &format),
        Command::Enforce(enforce_cli) => run_enforce(enforce_cli),
        Command::Serialize { root, output, quiet } => run_serialize(&root, &output, quiet),
    }
}

fn run_info() -> Result<(), PhaserError> {
    let root = store::find_phaser_root();
    let store = Store::new(Some(root.clone()));
    println!("{}", "Phaser".bold());
    println!("  store root: {}", root.display());
    println!("  config file: {}", store.get_path("config.yaml").display());
    Ok(())
}

fn run_diff(command: DiffCommand) -> Result<(), PhaserError> {
    match command {
        DiffCommand::Capture { path, audit, stage } => {
            let manifest = core::manifest::capture_manifest(&path, None)?;
            let store_root = store::find_phaser_root();
            let store = Store::new(Some(store_root));
            store.ensure_directories()?;

            let audit_id = audit.unwrap_or_else(|| "manual".to_string());
            let manifest_path = store
                .root()
                .join("manifests")
                .join(format!("{audit_id}-{stage}.yaml"));
            manifest.save(&manifest_path)?;

            println!(
                "{} {} files captured under {} ({})",
                "✓".green(),
                manifest.file_count,
                path.display(),
                manifest_path.display()
            );
            Ok(())
        }
        DiffCommand::Compare { audit_id, include_diff, format } => {
            let store = Store::new(Some(store::find_phaser_root()));
            let pre_path = store.root().join("manifests").join(format!("{audit_id}-pre.yaml"));
            let post_path = store.root().join("manifests").join(format!("{audit_id}-post.yaml"));

            let pre = core::manifest::Manifest::load(&pre_path)?;
            let post = core::manifest::Manifest::load(&post_path)?;

            let result = core::diff::compare_manifests(
                &pre,
                &post,
                include_diff,
                core::diff::DEFAULT_MAX_DIFF_SIZE,
            );

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&DiffJson::from(&result))?);
            } else {
                println!("{}", result.summary());
                if include_diff {
                    println!();
                    println!("{}", result.detailed());
                }
            }
            Ok(())
        }
    }
}

#[derive(serde::Serialize)]
struct DiffJson {
    summary: String,
    added: Vec<String>,
    modified: Vec<String>,
    deleted: Vec<String>,
    unchanged_count: usize,
}

impl From<&core::diff::DiffResult> for DiffJson {
    fn from(result: &core::diff::DiffResult) -> Self {
        Self {
            summary: result.summary(),
            added: result.added.iter().map(|c| c.path.clone()).collect(),
            modified: result.modified.iter().map(|c| c.path.clone()).collect(),
            deleted: result.deleted.iter().map(|c| c.path.clone()).collect(),
            unchanged_count: result.unchanged_count,
        }
    }
}

fn run_contracts(command: ContractsCommand) -> Result<(), PhaserError> {
    use plugins::contracts::{self, AuditSource, RuleType, Severity};

    let store = Store::new(Some(store::find_phaser_root()));

    match command {
        ContractsCommand::Create {
            id,
            rule_type,
            pattern,
            file_glob,
            message,
            severity,
            rationale,
        } => {
            let rule_type: RuleType = serde_json::from_value(serde_json::Value::String(rule_type))
                .map_err(|e| PhaserError::ValidationError(format!("invalid rule type: {e}")))?;
            let severity: Severity = serde_json::from_value(serde_json::Value::String(severity))
                .map_err(|e| PhaserError::ValidationError(format!("invalid severity: {e}")))?;

            let manual_source = AuditSource {
                id: "manual".to_string(),
                slug: "manual".to_string(),
                date: core::time::now_iso_millis(),
                phase: 0,
            };

            let contract = contracts::create_contract(
                &id, rule_type, pattern, &file_glob, &message, &rationale, manual_source, severity,
            );
            contracts::save_contract(&contract, &store)?;
            println!("{} contract {} saved", "✓".green(), id);
            Ok(())
        }
        ContractsCommand::Check { contract_id, fail_fast, verbose } => {
            let root = std::env::current_dir()?;
            let results = match contract_id {
                Some(id) => match contracts::load_contract(&id, &store)? {
                    Some(contract) => vec![contracts::check_contract(&contract, &root)],
                    None => return Err(PhaserError::NotFound(format!("contract {id}"))),
                },
                None => contracts::check_all_contracts(&store, &root, fail_fast)?,
            };
            println!("{}", contracts::format_check_results(&results, verbose));
            if results.iter().any(|r| !r.passed) {
                std::process::exit(1);
            }
            Ok(())
        }
        ContractsCommand::List { enabled_only } => {
            let contracts = contracts::load_contracts(&store, enabled_only)?;
            for contract in &contracts {
                println!(
                    "{}  {:?}  {}",
                    contract.rule.id, contract.rule.rule_type, contract.rule.file_glob
                );
            }
            println!("{} contract(s)", contracts.len());
            Ok(())
        }
        ContractsCommand::Enable { contract_id } => {
            contracts::enable_contract(&contract_id, &store)?;
            println!("{} enabled {}", "✓".green(), contract_id);
            Ok(())
        }
        ContractsCommand::Disable { contract_id } => {
            contracts::disable_contract(&contract_id, &store)?;
            println!("{} disabled {}", "✓".green(), contract_id);
            Ok(())
        }
    }
}

fn run_simulate(command: SimulateCommand) -> Result<(), PhaserError> {
    use plugins::sandbox;

    let root = std::env::current_dir()?;

    match command {
        SimulateCommand::Run { audit_id } => {
            let ctx = sandbox::begin_sandbox(&root, &audit_id)?;
            println!("{} sandbox started for {}", "✓".green(), ctx.audit_id);
            Ok(())
        }
        SimulateCommand::Status => {
            match sandbox::get_active_sandbox(&root)? {
                Some(ctx) => println!(
                    "active sandbox: {} (+{} ~{} -{})",
                    ctx.audit_id,
                    ctx.created_files.len(),
                    ctx.modified_files.len(),
                    ctx.deleted_files.len()
                ),
                None => println!("no active sandbox"),
            }
            Ok(())
        }
        SimulateCommand::Rollback => {
            match sandbox::get_active_sandbox(&root)? {
                Some(mut ctx) => {
                    sandbox::rollback_sandbox(&mut ctx)?;
                    println!("{} sandbox rolled back", "✓".green());
                }
                None => println!("no active sandbox"),
            }
            Ok(())
        }
        SimulateCommand::Commit => {
            match sandbox::get_active_sandbox(&root)? {
                Some(mut ctx) => {
                    sandbox::commit_sandbox(&mut ctx)?;
                    println!("{} sandbox changes kept", "✓".green());
                }
                None => println!("no active sandbox"),
            }
            Ok(())
        }
    }
}

fn run_branches(command: BranchesCommand) -> Result<(), PhaserError> {
    use plugins::branches;

    let root = std::env::current_dir()?;

    match command {
        BranchesCommand::Enable { audit_id, audit_slug } => {
            branches::begin_branch_mode(&root, &audit_id, &audit_slug)?;
            println!("{} branch mode enabled for {}", "✓".green(), audit_id);
            Ok(())
        }
        BranchesCommand::Status => {
            match branches::get_branch_context(&root)? {
                Some(ctx) => {
                    println!("active branch mode: {} ({} phases)", ctx.audit_id, ctx.branches.len());
                    for b in &ctx.branches {
                        println!("  phase {:02} -> {}", b.phase_num, b.branch_name);
                    }
                }
                None => println!("no active branch mode"),
            }
            Ok(())
        }
        BranchesCommand::Merge { target, strategy } => {
            let Some(mut ctx) = branches::get_branch_context(&root)? else {
                println!("no active branch mode");
                return Ok(());
            };
            branches::merge_all_branches(&mut ctx, &target, strategy.into())?;
            branches::cleanup_branches(&mut ctx)?;
            branches::end_branch_mode(&mut ctx)?;
            println!("{} merged into {}", "✓".green(), target);
            Ok(())
        }
        BranchesCommand::Cleanup => {
            let Some(mut ctx) = branches::get_branch_context(&root)? else {
                println!("no active branch mode");
                return Ok(());
            };
            branches::cleanup_branches(&mut ctx)?;
            println!("{} phase branches removed", "✓".green());
            Ok(())
        }
    }
}

fn run_check(fail_on_error: bool, format: &str) -> Result<(), PhaserError> {
    use plugins::contracts;

    let store = Store::new(Some(store::find_phaser_root()));
    let root = std::env::current_dir()?;
    let results = contracts::check_all_contracts(&store, &root, fail_on_error)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&results.iter().map(|r| {
            serde_json::json!({
                "contract_id": r.contract_id,
                "rule_id": r.rule_id,
                "passed": r.passed,
            })
        }).collect::<Vec<_>>())?);
    } else {
        println!("{}", contracts::format_check_results(&results, false));
    }

    if results.iter().any(|r| !r.passed) {
        std::process::exit(1);
    }
    Ok(())
}

fn run_enforce(enforce_cli: EnforceCli) -> Result<(), PhaserError> {
    use std::io::Read;

    if !enforce_cli.stdin {
        eprintln!("Error: --stdin is required for hook integration");
        std::process::exit(3);
    }

    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .map_err(PhaserError::IoError)?;

    let hook_input: serde_json::Value = if raw.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(&raw).map_err(|e| {
            eprintln!("Error: invalid JSON input: {e}");
            std::process::exit(3);
        })?
    };

    let hook_event = hook_input
        .get("hook_event_name")
        .and_then(|v| v.as_str())
        .unwrap_or("PreToolUse")
        .to_string();

    // Fallback only: `enforce_hook_input` prefers the envelope's own `cwd`,
    // since hooks run with the tool's working directory, not necessarily
    // this process's.
    let fallback_root = std::env::current_dir().ok();
    let result = plugins::enforce::enforce_hook_input(
        &hook_input,
        fallback_root.as_deref(),
        enforce_cli.severity.into(),
    );

    let hook_event = if hook_event == "PostToolUse" {
        plugins::enforce::HookEvent::PostToolUse
    } else {
        plugins::enforce::HookEvent::PreToolUse
    };

    if let Some(output) = plugins::enforce::format_hook_output(&result, hook_event) {
        println!("{}", serde_json::to_string(&output)?);
    }

    std::process::exit(0);
}

fn run_serialize(root: &Path, output: &PathBuf, quiet: bool) -> Result<(), PhaserError> {
    use plugins::serialize;

    if !quiet {
        eprintln!("Serializing {}...", root.display());
    }

    let workspace = serialize::serialize_workspace(root)
        .map_err(PhaserError::ValidationError)?;
    let yaml = serialize::to_yaml(&workspace);

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, yaml)?;

    if !quiet {
        eprintln!(
            "Serialized {} files ({} bytes) to {}",
            workspace.file_count,
            workspace.total_size_bytes,
            output.display()
        );
    }
    Ok(())
}
