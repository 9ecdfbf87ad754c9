//! CLI struct definitions for the Phaser command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs::run()`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(
    name = "phaser",
    version = env!("CARGO_PKG_VERSION"),
    about = "Phaser snapshots a workspace, checks it against contracts, runs phased audits in a sandbox or branch chain, and enforces contracts at tool-call time.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Capture and compare workspace manifests
    Diff(DiffCli),
    /// Shortcut for `diff capture <path>`
    Manifest {
        /// Path to capture
        path: PathBuf,
        /// Audit id to associate the manifest with
        #[clap(long)]
        audit: Option<String>,
    },
    /// Manage contracts (audit-origin, nested shape)
    Contracts(ContractsCli),
    /// Run an audit phase chain in sandbox (dry-run) mode
    Simulate(SimulateCli),
    /// Run an audit phase chain with a branch per phase
    Branches(BranchesCli),
    /// Check the current workspace against all enabled contracts
    Check {
        /// Abort on the first failing contract
        #[clap(long)]
        fail_on_error: bool,
        /// Output format: 'text' or 'json'
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Enforcement gate: read a Claude Code hook envelope from stdin
    Enforce(EnforceCli),
    /// Dependency-free workspace-to-YAML serializer
    Serialize {
        /// Workspace root directory
        #[clap(long, default_value = ".")]
        root: PathBuf,
        /// Output YAML file path
        #[clap(long, short = 'o')]
        output: PathBuf,
        /// Suppress progress output
        #[clap(long, short = 'q')]
        quiet: bool,
    },
    /// Print resolved store root and configuration
    Info,
    /// Print the crate version
    Version,
}

#[derive(clap::Args, Debug)]
pub(crate) struct DiffCli {
    #[clap(subcommand)]
    pub command: DiffCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum DiffCommand {
    /// Capture a manifest snapshot of `path`
    Capture {
        path: PathBuf,
        /// Audit id to store the manifest under
        #[clap(long)]
        audit: Option<String>,
        /// 'pre' or 'post' stage label
        #[clap(long, default_value = "pre")]
        stage: String,
    },
    /// Compare the pre/post manifests of an audit
    Compare {
        audit_id: String,
        /// Include per-file unified diff hunks
        #[clap(long)]
        include_diff: bool,
        /// Output format: 'text' or 'json'
        #[clap(long, default_value = "text")]
        format: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct ContractsCli {
    #[clap(subcommand)]
    pub command: ContractsCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ContractsCommand {
    /// Create a new contract
    Create {
        #[clap(long)]
        id: String,
        #[clap(long = "type", value_name = "RULE_TYPE")]
        rule_type: String,
        #[clap(long)]
        pattern: Option<String>,
        #[clap(long)]
        file_glob: String,
        #[clap(long)]
        message: String,
        #[clap(long, default_value = "error")]
        severity: String,
        #[clap(long, default_value = "")]
        rationale: String,
    },
    /// Check the workspace against one or all contracts
    Check {
        /// Only check this contract id (checks all when omitted)
        contract_id: Option<String>,
        /// Stop at the first failing contract
        #[clap(long)]
        fail_fast: bool,
        #[clap(long)]
        verbose: bool,
    },
    /// List stored contracts
    List {
        #[clap(long)]
        enabled_only: bool,
    },
    /// Enable a disabled contract
    Enable { contract_id: String },
    /// Disable an enabled contract
    Disable { contract_id: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct SimulateCli {
    #[clap(subcommand)]
    pub command: SimulateCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum SimulateCommand {
    /// Begin a sandbox session for `audit_id`
    Run { audit_id: String },
    /// Show the active sandbox session, if any
    Status,
    /// Roll back the active sandbox session
    Rollback,
    /// Keep the active sandbox session's changes
    Commit,
}

#[derive(clap::Args, Debug)]
pub(crate) struct BranchesCli {
    #[clap(subcommand)]
    pub command: BranchesCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum BranchesCommand {
    /// Begin branch mode for `audit_id`
    Enable { audit_id: String, audit_slug: String },
    /// Show the active branch context, if any
    Status,
    /// Merge the phase chain into `target` and clean up
    Merge {
        target: String,
        #[clap(long, value_enum, default_value = "squash")]
        strategy: MergeStrategyArg,
    },
    /// Force-delete every phase branch without merging
    Cleanup,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub(crate) enum MergeStrategyArg {
    Squash,
    Rebase,
    Merge,
}

impl From<MergeStrategyArg> for crate::plugins::branches::MergeStrategy {
    fn from(value: MergeStrategyArg) -> Self {
        match value {
            MergeStrategyArg::Squash => crate::plugins::branches::MergeStrategy::Squash,
            MergeStrategyArg::Rebase => crate::plugins::branches::MergeStrategy::Rebase,
            MergeStrategyArg::Merge => crate::plugins::branches::MergeStrategy::Merge,
        }
    }
}

#[derive(clap::Args, Debug)]
pub(crate) struct EnforceCli {
    /// Read hook input from stdin (required for hook integration)
    #[clap(long)]
    pub stdin: bool,
    #[clap(long, value_enum, default_value = "all")]
    pub severity: SeverityArg,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub(crate) enum SeverityArg {
    Error,
    Warning,
    All,
}

impl From<SeverityArg> for crate::plugins::enforce::Severity {
    fn from(value: SeverityArg) -> Self {
        match value {
            SeverityArg::Error => crate::plugins::enforce::Severity::Error,
            SeverityArg::Warning => crate::plugins::enforce::Severity::Warning,
            SeverityArg::All => crate::plugins::enforce::Severity::All,
        }
    }
}
