//! Contract engine: persisted rules extracted from audit phases, checked
//! against the codebase on demand.
//!
//! Mirrors decapod's `Violation`/`CheckResult` shape (see
//! `core::gatekeeper`), generalized to the six rule types Phaser supports.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::error::PhaserError;
use crate::core::store::Store;
use crate::core::time::now_iso_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    ForbidPattern,
    RequirePattern,
    FileExists,
    FileNotExists,
    FileContains,
    FileNotContains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSource {
    pub id: String,
    pub slug: String,
    pub date: String,
    pub phase: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub severity: Severity,
    pub pattern: Option<String>,
    pub file_glob: String,
    pub message: String,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub version: u32,
    pub audit_source: AuditSource,
    pub rule: Rule,
    pub created_at: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Contract {
    /// A contract's identity is its rule id.
    pub fn contract_id(&self) -> &str {
        &self.rule.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub line: Option<usize>,
    #[serde(rename = "match")]
    pub matched: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub contract_id: String,
    pub rule_id: String,
    pub passed: bool,
    pub violations: Vec<Violation>,
    pub checked_at: String,
}

impl CheckResult {
    fn new(contract_id: String, rule_id: String, violations: Vec<Violation>) -> Self {
        Self {
            contract_id,
            rule_id,
            passed: violations.is_empty(),
            violations,
            checked_at: now_iso_millis(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn create_contract(
    rule_id: &str,
    rule_type: RuleType,
    pattern: Option<String>,
    file_glob: &str,
    message: &str,
    rationale: &str,
    audit_source: AuditSource,
    severity: Severity,
) -> Contract {
    Contract {
        version: 1,
        audit_source,
        rule: Rule {
            id: rule_id.to_string(),
            rule_type,
            severity,
            pattern,
            file_glob: file_glob.to_string(),
            message: message.to_string(),
            rationale: rationale.to_string(),
        },
        created_at: now_iso_millis(),
        enabled: true,
    }
}

fn contracts_dir(store: &Store) -> PathBuf {
    store.get_path("contracts")
}

pub fn save_contract(contract: &Contract, store: &Store) -> Result<String, PhaserError> {
    store.ensure_directories()?;
    let dir = contracts_dir(store);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.yaml", contract.rule.id));
    std::fs::write(&path, serde_yaml::to_string(contract)?)?;
    Ok(contract.rule.id.clone())
}

pub fn load_contract(contract_id: &str, store: &Store) -> Result<Option<Contract>, PhaserError> {
    let path = contracts_dir(store).join(format!("{contract_id}.yaml"));
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(Some(serde_yaml::from_str(&raw)?))
}

pub fn load_contracts(store: &Store, enabled_only: bool) -> Result<Vec<Contract>, PhaserError> {
    let dir = contracts_dir(store);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("yaml"))
        .collect();
    paths.sort();

    let mut contracts = Vec::new();
    for path in paths {
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(contract) = serde_yaml::from_str::<Contract>(&raw) else {
            continue;
        };
        if !enabled_only || contract.enabled {
            contracts.push(contract);
        }
    }
    Ok(contracts)
}

pub fn enable_contract(contract_id: &str, store: &Store) -> Result<bool, PhaserError> {
    set_enabled(contract_id, store, true)
}

pub fn disable_contract(contract_id: &str, store: &Store) -> Result<bool, PhaserError> {
    set_enabled(contract_id, store, false)
}

fn set_enabled(contract_id: &str, store: &Store, enabled: bool) -> Result<bool, PhaserError> {
    match load_contract(contract_id, store)? {
        Some(mut contract) => {
            contract.enabled = enabled;
            save_contract(&contract, store)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

// -- Pattern matching helpers -------------------------------------------------

/// Translate a glob pattern into a regex: `**` becomes `.*`, `*` becomes
/// `[^/]*`. Falls back to simple fnmatch-style behavior for globs with no
/// `**` (the two behave identically for single-`*` patterns).
pub fn glob_to_regex(pattern: &str) -> Result<Regex, PhaserError> {
    let mut out = String::with_capacity(pattern.len() * 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => out.push_str(r"\."),
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            other if "+()[]{}|^$\\".contains(other) => {
                out.push('\\');
                out.push(other);
            }
            other => out.push(other),
        }
    }
    out.push('$');
    Ok(Regex::new(&out)?)
}

pub fn glob_match(pattern: &str, path: &str) -> bool {
    match glob_to_regex(pattern) {
        Ok(re) => re.is_match(path),
        Err(_) => false,
    }
}

fn collect_matching_files(file_glob: &str, root: &Path) -> Vec<PathBuf> {
    if file_glob.contains('*') || file_glob.contains('?') {
        walk_and_filter(root, file_glob)
    } else {
        let path = root.join(file_glob);
        if path.exists() {
            vec![path]
        } else {
            Vec::new()
        }
    }
}

fn walk_and_filter(root: &Path, file_glob: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(root) {
                let rel_str = rel.to_string_lossy().replace('\\', "/");
                if glob_match(file_glob, &rel_str) {
                    out.push(path);
                }
            }
        }
    }
    out.sort();
    out
}

fn is_binary(content: &[u8]) -> bool {
    content[..content.len().min(8192)].contains(&0u8)
}

pub fn find_pattern_violations(
    pattern: &str,
    file_glob: &str,
    root: &Path,
    forbid: bool,
) -> Vec<Violation> {
    let files = collect_matching_files(file_glob, root);

    let regex = match Regex::new(pattern) {
        Ok(r) => r,
        Err(e) => {
            return vec![Violation {
                path: String::new(),
                line: None,
                matched: String::new(),
                message: format!("Invalid regex pattern: {e}"),
            }]
        }
    };

    let mut violations = Vec::new();

    for filepath in &files {
        if !filepath.is_file() {
            continue;
        }
        let Ok(metadata) = filepath.metadata() else {
            continue;
        };
        if metadata.len() > 1_000_000 {
            continue;
        }
        let Ok(content_bytes) = std::fs::read(filepath) else {
            continue;
        };
        if is_binary(&content_bytes) {
            continue;
        }
        let Ok(content) = String::from_utf8(content_bytes) else {
            continue;
        };
        let rel_path = filepath
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| filepath.to_string_lossy().to_string());

        if forbid {
            for (i, line) in content.lines().enumerate() {
                if let Some(m) = regex.find(line) {
                    violations.push(Violation {
                        path: rel_path.clone(),
                        line: Some(i + 1),
                        matched: m.as_str().to_string(),
                        message: format!("Forbidden pattern found: {}", m.as_str()),
                    });
                }
            }
        }
    }

    if !forbid {
        let found_any = files.iter().any(|filepath| {
            filepath.is_file()
                && std::fs::read_to_string(filepath)
                    .map(|content| regex.is_match(&content))
                    .unwrap_or(false)
        });
        if !found_any {
            violations.push(Violation {
                path: file_glob.to_string(),
                line: None,
                matched: String::new(),
                message: format!("Required pattern not found: {pattern}"),
            });
        }
    }

    violations
}

pub fn check_file_exists(path: &str, root: &Path) -> bool {
    root.join(path).exists()
}

pub fn check_file_contains(path: &str, text: &str, root: &Path) -> (bool, Option<usize>) {
    let filepath = root.join(path);
    let Ok(content) = std::fs::read_to_string(&filepath) else {
        return (false, None);
    };
    for (i, line) in content.lines().enumerate() {
        if line.contains(text) {
            return (true, Some(i + 1));
        }
    }
    (false, None)
}

// -- Checking operations ------------------------------------------------------

pub fn check_contract(contract: &Contract, root: &Path) -> CheckResult {
    let rule = &contract.rule;
    let violations = match rule.rule_type {
        RuleType::ForbidPattern => match &rule.pattern {
            Some(p) => find_pattern_violations(p, &rule.file_glob, root, true),
            None => Vec::new(),
        },
        RuleType::RequirePattern => match &rule.pattern {
            Some(p) => find_pattern_violations(p, &rule.file_glob, root, false),
            None => Vec::new(),
        },
        RuleType::FileExists => {
            if check_file_exists(&rule.file_glob, root) {
                Vec::new()
            } else {
                vec![simple_violation(&rule.file_glob, &rule.message)]
            }
        }
        RuleType::FileNotExists => {
            if check_file_exists(&rule.file_glob, root) {
                vec![simple_violation(&rule.file_glob, &rule.message)]
            } else {
                Vec::new()
            }
        }
        RuleType::FileContains => match &rule.pattern {
            Some(p) => {
                let (found, _) = check_file_contains(&rule.file_glob, p, root);
                if found {
                    Vec::new()
                } else {
                    vec![simple_violation(&rule.file_glob, &rule.message)]
                }
            }
            None => Vec::new(),
        },
        RuleType::FileNotContains => match &rule.pattern {
            Some(p) => {
                let (found, line) = check_file_contains(&rule.file_glob, p, root);
                if found {
                    vec![Violation {
                        path: rule.file_glob.clone(),
                        line,
                        matched: p.clone(),
                        message: rule.message.clone(),
                    }]
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        },
    };

    CheckResult::new(contract.contract_id().to_string(), rule.id.clone(), violations)
}

fn simple_violation(path: &str, message: &str) -> Violation {
    Violation {
        path: path.to_string(),
        line: None,
        matched: String::new(),
        message: message.to_string(),
    }
}

pub fn check_all_contracts(
    store: &Store,
    root: &Path,
    fail_fast: bool,
) -> Result<Vec<CheckResult>, PhaserError> {
    let contracts = load_contracts(store, true)?;
    let mut results = Vec::new();
    for contract in &contracts {
        let result = check_contract(contract, root);
        let failed = !result.passed;
        results.push(result);
        if fail_fast && failed {
            break;
        }
    }
    Ok(results)
}

pub fn format_check_results(results: &[CheckResult], verbose: bool) -> String {
    if results.is_empty() {
        return "No contracts to check.".to_string();
    }

    let mut lines = Vec::new();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.len() - passed;

    for result in results {
        let status = if result.passed { "PASS" } else { "FAIL" };
        lines.push(format!("[{status}] {}", result.rule_id));
        if verbose && !result.passed {
            for violation in &result.violations {
                let loc = violation
                    .line
                    .map(|l| format!(":{l}"))
                    .unwrap_or_default();
                lines.push(format!("  {}{loc}: {}", violation.path, violation.message));
            }
        }
    }

    lines.push(String::new());
    lines.push(format!("Results: {passed} passed, {failed} failed"));
    lines.join("\n")
}
