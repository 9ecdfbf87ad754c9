//! Enforcement gate: reads a Claude Code hook envelope from stdin,
//! reconstructs the proposed file state for Write/Edit tool calls, checks it
//! against loaded contracts, and emits an allow/deny hook decision.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plugins::contract_loader::{self, Contract, EnforcementViolation};
use crate::plugins::ignore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
}

impl HookEvent {
    fn from_name(name: &str) -> Self {
        match name {
            "PostToolUse" => HookEvent::PostToolUse,
            _ => HookEvent::PreToolUse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    All,
}

#[derive(Debug, Clone)]
pub struct ProposedFile {
    pub path: String,
    pub content: String,
    pub is_new: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReconstructionResult {
    pub files: Vec<ProposedFile>,
    pub skipped: bool,
    pub skip_reason: Option<String>,
}

impl ReconstructionResult {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            files: Vec::new(),
            skipped: true,
            skip_reason: Some(reason.into()),
        }
    }
}

/// Heuristic text-vs-binary check on hook-supplied content: a NUL byte, or
/// more than 10% non-printable characters outside `\n\r\t`, marks it binary.
pub fn is_valid_text(content: &str) -> bool {
    if content.is_empty() {
        return true;
    }
    if content.contains('\0') {
        return false;
    }
    let non_printable = content
        .chars()
        .filter(|&c| (c as u32) < 32 && c != '\n' && c != '\r' && c != '\t')
        .count();
    (non_printable as f64 / content.chars().count() as f64) <= 0.1
}

fn reconstruct_write(tool_input: &Value) -> ReconstructionResult {
    let path = tool_input.get("file_path").and_then(|v| v.as_str()).unwrap_or("");
    let content = tool_input.get("content").and_then(|v| v.as_str()).unwrap_or("");

    if path.is_empty() {
        return ReconstructionResult::skip("Missing file_path");
    }
    if !is_valid_text(content) {
        return ReconstructionResult::skip("Binary content detected");
    }

    ReconstructionResult {
        files: vec![ProposedFile {
            path: path.to_string(),
            content: content.to_string(),
            is_new: !Path::new(path).exists(),
        }],
        skipped: false,
        skip_reason: None,
    }
}

fn reconstruct_edit(tool_input: &Value) -> ReconstructionResult {
    let path = tool_input.get("file_path").and_then(|v| v.as_str()).unwrap_or("");
    let old_str = tool_input.get("old_str").and_then(|v| v.as_str()).unwrap_or("");
    let new_str = tool_input.get("new_str").and_then(|v| v.as_str()).unwrap_or("");

    if path.is_empty() {
        return ReconstructionResult::skip("Missing file_path");
    }

    let file_path = Path::new(path);
    if !file_path.exists() {
        return ReconstructionResult::skip(format!("File not found: {path}"));
    }

    let raw = match std::fs::read(file_path) {
        Ok(bytes) => bytes,
        Err(e) => return ReconstructionResult::skip(format!("Cannot read file: {e}")),
    };
    let current = match String::from_utf8(raw) {
        Ok(text) => text,
        Err(_) => return ReconstructionResult::skip("Binary file detected"),
    };

    if !current.contains(old_str) {
        return ReconstructionResult::skip("old_str not found in file");
    }

    let proposed = current.replacen(old_str, new_str, 1);

    ReconstructionResult {
        files: vec![ProposedFile {
            path: path.to_string(),
            content: proposed,
            is_new: false,
        }],
        skipped: false,
        skip_reason: None,
    }
}

/// Reconstruct the proposed file state for whatever tool the hook envelope
/// names. Any tool besides Write/Edit is reported as a skip, not an error —
/// enforcement has nothing to check for tools that don't touch file content.
pub fn reconstruct(hook_input: &Value) -> ReconstructionResult {
    let tool_name = hook_input.get("tool_name").and_then(|v| v.as_str()).unwrap_or("");
    let empty = serde_json::json!({});
    let tool_input = hook_input.get("tool_input").unwrap_or(&empty);

    match tool_name {
        "Write" => reconstruct_write(tool_input),
        "Edit" => reconstruct_edit(tool_input),
        other => ReconstructionResult::skip(format!("Unknown tool: {other}")),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforceResult {
    pub decision: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl EnforceResult {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            decision: "allow".to_string(),
            reason: reason.into(),
            violations: Vec::new(),
        }
    }

    fn deny(reason: impl Into<String>, violations: Vec<String>) -> Self {
        Self {
            decision: "deny".to_string(),
            reason: reason.into(),
            violations,
        }
    }
}

/// Format the enforcement decision as the Claude Code hook output shape.
/// Returns `None` when nothing should be printed (an allowed PostToolUse).
pub fn format_hook_output(result: &EnforceResult, hook_event: HookEvent) -> Option<Value> {
    match hook_event {
        HookEvent::PreToolUse => Some(serde_json::json!({
            "hookSpecificOutput": {
                "hookEventName": "PreToolUse",
                "permissionDecision": if result.decision == "allow" { "allow" } else { "deny" },
                "permissionDecisionReason": result.reason,
            }
        })),
        HookEvent::PostToolUse => {
            if result.decision == "allow" {
                None
            } else {
                Some(serde_json::json!({
                    "decision": "block",
                    "reason": result.reason,
                    "hookSpecificOutput": {
                        "hookEventName": "PostToolUse",
                        "additionalContext": result.reason,
                    }
                }))
            }
        }
    }
}

fn violation_passes_severity(contract: &Contract, severity: Severity) -> bool {
    match severity {
        Severity::All => true,
        Severity::Error => contract.severity == "error",
        Severity::Warning => contract.severity == "warning",
    }
}

/// Check every applicable contract against a single proposed file, returning
/// violation messages that survive ignore-directive filtering.
fn check_file(contract: &Contract, file: &ProposedFile) -> Vec<EnforcementViolation> {
    if !contract.matches_file(&file.path) {
        return Vec::new();
    }

    let violations = match contract.rule_type.as_str() {
        "forbid_pattern" => {
            let Some(re) = contract.compiled_pattern() else { return Vec::new() };
            file.content
                .lines()
                .enumerate()
                .filter(|(_, line)| re.is_match(line))
                .map(|(idx, _)| EnforcementViolation {
                    rule_id: contract.rule_id.clone(),
                    line_number: Some(idx + 1),
                    path: file.path.clone(),
                    message: contract.message.clone(),
                    severity: contract.severity.clone(),
                })
                .collect()
        }
        "require_pattern" => {
            let Some(re) = contract.compiled_pattern() else { return Vec::new() };
            if re.is_match(&file.content) {
                Vec::new()
            } else {
                vec![EnforcementViolation {
                    rule_id: contract.rule_id.clone(),
                    line_number: None,
                    path: file.path.clone(),
                    message: contract.message.clone(),
                    severity: contract.severity.clone(),
                }]
            }
        }
        "file_not_contains" => {
            let Some(re) = contract.compiled_pattern() else { return Vec::new() };
            match file.content.lines().enumerate().find(|(_, l)| re.is_match(l)) {
                Some((idx, _)) => vec![EnforcementViolation {
                    rule_id: contract.rule_id.clone(),
                    line_number: Some(idx + 1),
                    path: file.path.clone(),
                    message: contract.message.clone(),
                    severity: contract.severity.clone(),
                }],
                None => Vec::new(),
            }
        }
        "file_contains" => {
            let Some(re) = contract.compiled_pattern() else { return Vec::new() };
            if file.content.lines().any(|l| re.is_match(l)) {
                Vec::new()
            } else {
                vec![EnforcementViolation {
                    rule_id: contract.rule_id.clone(),
                    line_number: None,
                    path: file.path.clone(),
                    message: contract.message.clone(),
                    severity: contract.severity.clone(),
                }]
            }
        }
        // file_exists / file_not_exists are checked against the filesystem
        // at audit time, not the hook's proposed content — nothing to
        // enforce here.
        _ => Vec::new(),
    };

    violations
}

/// Run the full enforcement pipeline for one hook envelope. `project_root`
/// is a fallback used only when the envelope carries no `cwd` field — the
/// envelope's own `cwd` always wins, since a hook runs with the tool's
/// working directory, not necessarily the gate process's own.
pub fn enforce_hook_input(
    hook_input: &Value,
    project_root: Option<&Path>,
    severity: Severity,
) -> EnforceResult {
    let hook_event = HookEvent::from_name(
        hook_input.get("hook_event_name").and_then(|v| v.as_str()).unwrap_or("PreToolUse"),
    );

    let reconstruction = reconstruct(hook_input);
    if reconstruction.skipped {
        let reason = reconstruction
            .skip_reason
            .unwrap_or_else(|| "Nothing to enforce".to_string());
        return EnforceResult::allow(reason);
    }

    let envelope_cwd = hook_input.get("cwd").and_then(|v| v.as_str()).map(Path::new);
    let load_result = contract_loader::load_contracts(envelope_cwd.or(project_root));
    let applicable: Vec<&Contract> = load_result
        .contracts
        .iter()
        .filter(|c| violation_passes_severity(c, severity))
        .collect();

    let mut all_violations = Vec::new();
    for file in &reconstruction.files {
        let mut file_violations = Vec::new();
        for contract in &applicable {
            file_violations.extend(check_file(contract, file));
        }
        let (remaining, _ignored) =
            ignore::filter_violations(&file_violations, &file.path, &file.content);
        all_violations.extend(remaining);
    }

    if all_violations.is_empty() {
        EnforceResult::allow("Phaser enforce: no contract violations")
    } else {
        let messages: Vec<String> = all_violations
            .iter()
            .map(|v| format!("{} ({}): {}", v.path, v.rule_id, v.message))
            .collect();
        let reason = format!("Contract violations found:\n{}", messages.join("\n"));
        let _ = hook_event;
        EnforceResult::deny(reason, messages)
    }
}
