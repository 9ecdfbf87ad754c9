//! Loads and validates the flat contract shape the enforcement gate checks
//! against, merging project and user contract directories by precedence.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;

use super::ignore::Ignorable;

pub const VALID_TYPES: &[&str] = &[
    "forbid_pattern",
    "require_pattern",
    "file_exists",
    "file_not_exists",
    "file_contains",
    "file_not_contains",
];

pub const VALID_SEVERITIES: &[&str] = &["error", "warning"];

/// A single enforcement-time contract, flatter than the audit-origin
/// `plugins::contracts::Contract` shape — this is what `.claude/contracts`
/// and `~/.phaser/contracts` YAML files deserialize into directly.
#[derive(Debug, Clone)]
pub struct Contract {
    pub rule_id: String,
    pub rule_type: String,
    pub pattern: Option<String>,
    pub file_glob: String,
    pub message: String,
    pub severity: String,
    pub rationale: String,
    pub enabled: bool,
    pub source: ContractSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractSource {
    User,
    Project,
}

impl Contract {
    pub fn matches_file(&self, file_path: &str) -> bool {
        crate::plugins::contracts::glob_match(&self.file_glob, file_path)
    }

    pub fn compiled_pattern(&self) -> Option<Regex> {
        self.pattern.as_ref().and_then(|p| Regex::new(p).ok())
    }
}

/// Minimal violation shape produced while enforcing; filterable via
/// `plugins::ignore`.
#[derive(Debug, Clone)]
pub struct EnforcementViolation {
    pub rule_id: String,
    pub line_number: Option<usize>,
    pub path: String,
    pub message: String,
    pub severity: String,
}

impl Ignorable for EnforcementViolation {
    fn rule_id(&self) -> &str {
        &self.rule_id
    }
    fn line_number(&self) -> Option<usize> {
        self.line_number
    }
}

pub struct LoadResult {
    pub contracts: Vec<Contract>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawContract {
    rule_id: Option<String>,
    #[serde(rename = "type")]
    rule_type: Option<String>,
    pattern: Option<String>,
    file_glob: Option<String>,
    message: Option<String>,
    severity: Option<String>,
    #[serde(default)]
    rationale: String,
    #[serde(default = "super_default_true")]
    enabled: bool,
}

fn super_default_true() -> bool {
    true
}

fn rule_id_re() -> Regex {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9-]{0,63}$").unwrap()
}

pub fn validate_contract(data: &Value, source: ContractSource) -> Result<Contract, String> {
    let raw: RawContract = serde_yaml::from_value(data.clone())
        .map_err(|e| format!("malformed contract: {e}"))?;

    let rule_id = raw.rule_id.unwrap_or_default();
    if rule_id.is_empty() {
        return Err("Missing rule_id".to_string());
    }
    if !rule_id_re().is_match(&rule_id) {
        return Err(format!("Invalid rule_id: {rule_id}"));
    }

    let rule_type = raw.rule_type.unwrap_or_default();
    if !VALID_TYPES.contains(&rule_type.as_str()) {
        return Err(format!("Invalid type '{rule_type}' for {rule_id}"));
    }

    let pattern_required = matches!(
        rule_type.as_str(),
        "forbid_pattern" | "require_pattern" | "file_contains" | "file_not_contains"
    );
    if pattern_required {
        match &raw.pattern {
            None => return Err(format!("Missing pattern for {rule_id}")),
            Some(p) if p.is_empty() => return Err(format!("Missing pattern for {rule_id}")),
            Some(p) => {
                if let Err(e) = Regex::new(p) {
                    return Err(format!("Invalid regex for {rule_id}: {e}"));
                }
            }
        }
    }

    let file_glob = raw.file_glob.unwrap_or_default();
    if file_glob.is_empty() {
        return Err(format!("Missing file_glob for {rule_id}"));
    }

    let severity = raw.severity.unwrap_or_default();
    if !VALID_SEVERITIES.contains(&severity.as_str()) {
        return Err(format!("Invalid severity '{severity}' for {rule_id}"));
    }

    let message = raw.message.unwrap_or_default();
    if message.is_empty() {
        return Err(format!("Missing message for {rule_id}"));
    }

    Ok(Contract {
        rule_id,
        rule_type,
        pattern: raw.pattern,
        file_glob,
        message,
        severity,
        rationale: raw.rationale,
        enabled: raw.enabled,
        source,
    })
}

pub fn load_contracts_from_dir(contracts_dir: &Path, source: ContractSource) -> LoadResult {
    let mut contracts = Vec::new();
    let mut warnings = Vec::new();

    if !contracts_dir.exists() {
        return LoadResult { contracts, warnings };
    }

    let Ok(entries) = std::fs::read_dir(contracts_dir) else {
        return LoadResult { contracts, warnings };
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("yaml"))
        .collect();
    paths.sort();

    for path in paths {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let raw = match std::fs::read_to_string(&path) {
            Ok(r) => r,
            Err(e) => {
                warnings.push(format!("{name}: Read error: {e}"));
                continue;
            }
        };
        let data: Value = match serde_yaml::from_str(&raw) {
            Ok(d) => d,
            Err(e) => {
                warnings.push(format!("{name}: YAML parse error: {e}"));
                continue;
            }
        };
        if data.is_null() {
            continue;
        }
        if !data.is_mapping() {
            warnings.push(format!("{name}: Expected YAML dict"));
            continue;
        }
        match validate_contract(&data, source) {
            Ok(contract) if contract.enabled => contracts.push(contract),
            Ok(_) => {}
            Err(e) => warnings.push(format!("{name}: {e}")),
        }
    }

    LoadResult { contracts, warnings }
}

/// Load contracts from `<project_root>/.claude/contracts` (higher
/// precedence) and `~/.phaser/contracts` (lower precedence), deduping by
/// `rule_id` with project contracts winning.
pub fn load_contracts(project_root: Option<&Path>) -> LoadResult {
    let mut all_contracts = Vec::new();
    let mut all_warnings = Vec::new();
    let mut seen_ids = HashSet::new();

    if let Some(root) = project_root {
        let project_dir = root.join(".claude").join("contracts");
        let result = load_contracts_from_dir(&project_dir, ContractSource::Project);
        for contract in result.contracts {
            seen_ids.insert(contract.rule_id.clone());
            all_contracts.push(contract);
        }
        all_warnings.extend(result.warnings);
    }

    let user_dir = home_dir().join(".phaser").join("contracts");
    let result = load_contracts_from_dir(&user_dir, ContractSource::User);
    for contract in result.contracts {
        if !seen_ids.contains(&contract.rule_id) {
            seen_ids.insert(contract.rule_id.clone());
            all_contracts.push(contract);
        }
    }
    all_warnings.extend(result.warnings);

    LoadResult {
        contracts: all_contracts,
        warnings: all_warnings,
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_contract(dir: &Path, name: &str, yaml: &str) {
        std::fs::write(dir.join(name), yaml).unwrap();
    }

    #[test]
    fn validate_rejects_bad_rule_id() {
        let data: Value = serde_yaml::from_str(
            "rule_id: 'bad id!'\ntype: file_exists\nfile_glob: x\nseverity: error\nmessage: m\n",
        )
        .unwrap();
        let err = validate_contract(&data, ContractSource::User).unwrap_err();
        assert!(err.starts_with("Invalid rule_id"));
    }

    #[test]
    fn validate_requires_pattern_for_forbid_pattern() {
        let data: Value = serde_yaml::from_str(
            "rule_id: no-todo\ntype: forbid_pattern\nfile_glob: '**/*.py'\nseverity: error\nmessage: m\n",
        )
        .unwrap();
        let err = validate_contract(&data, ContractSource::User).unwrap_err();
        assert!(err.starts_with("Missing pattern"));
    }

    #[test]
    fn project_contract_wins_over_user_with_same_id() {
        let project = tempdir().unwrap();
        let user_contracts = tempdir().unwrap();
        std::env::set_var("HOME", user_contracts.path());

        let project_dir = project.path().join(".claude").join("contracts");
        std::fs::create_dir_all(&project_dir).unwrap();
        write_contract(
            &project_dir,
            "shared.yaml",
            "rule_id: shared\ntype: file_exists\nfile_glob: a.txt\nseverity: error\nmessage: project wins\n",
        );

        let user_dir = user_contracts.path().join(".phaser").join("contracts");
        std::fs::create_dir_all(&user_dir).unwrap();
        write_contract(
            &user_dir,
            "shared.yaml",
            "rule_id: shared\ntype: file_exists\nfile_glob: a.txt\nseverity: error\nmessage: user loses\n",
        );

        let result = load_contracts(Some(project.path()));
        assert_eq!(result.contracts.len(), 1);
        assert_eq!(result.contracts[0].message, "project wins");
    }
}
