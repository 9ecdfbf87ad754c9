//! Error types for Phaser operations.
//!
//! This module defines the canonical error type used throughout Phaser.
//! All subsystems return `Result<T, PhaserError>` for error handling.

use std::env;
use std::io;
use thiserror::Error;

/// Canonical error type for all Phaser operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
/// Many variants auto-convert from standard library or dependency errors via
/// `#[from]`.
#[derive(Error, Debug)]
pub enum PhaserError {
    /// I/O error (auto-converts from `std::io::Error`)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid regex pattern supplied by a contract rule or ignore directive
    #[error("Invalid regex pattern: {0}")]
    RegexError(#[from] regex::Error),

    /// Environment variable error (auto-converts from `std::env::VarError`)
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] env::VarError),

    /// Path resolution or validation error
    #[error("Path error: {0}")]
    PathError(String),

    /// Resource not found (missing audit, event log, contract file, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// A store write or read could not acquire its advisory lock in time
    #[error("Lock error: {0}")]
    LockError(String),

    /// A contract file failed structural validation
    #[error("Invalid contract: {0}")]
    InvalidContract(String),

    /// A git subprocess invocation failed or returned a nonzero exit
    #[error("Git error: {0}")]
    GitError(String),

    /// Sandbox (dry-run) mode misuse — already active, or none active
    #[error("Sandbox error: {0}")]
    SandboxError(String),

    /// Branch mode misuse — already active, branch exists, merge conflict
    #[error("Branch error: {0}")]
    BranchError(String),

    /// Malformed enforcement-gate input (bad envelope, unknown tool, etc.)
    #[error("Enforcement error: {0}")]
    EnforcementError(String),

    /// Generic validation failure not covered by a more specific variant
    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = PhaserError::ValidationError("test failed".to_string());
        assert_eq!(format!("{}", err), "Validation error: test failed");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = PhaserError::NotFound("audit abc123 not found".to_string());
        assert_eq!(format!("{}", err), "Not found: audit abc123 not found");
    }

    #[test]
    fn test_git_error_display() {
        let err = PhaserError::GitError("checkout failed".to_string());
        assert_eq!(format!("{}", err), "Git error: checkout failed");
    }

    #[test]
    fn test_sandbox_error_display() {
        let err = PhaserError::SandboxError("already active".to_string());
        assert_eq!(format!("{}", err), "Sandbox error: already active");
    }

    #[test]
    fn test_branch_error_display() {
        let err = PhaserError::BranchError("branch exists".to_string());
        assert_eq!(format!("{}", err), "Branch error: branch exists");
    }

    #[test]
    fn test_path_error_display() {
        let err = PhaserError::PathError("invalid path".to_string());
        assert_eq!(format!("{}", err), "Path error: invalid path");
    }
}
