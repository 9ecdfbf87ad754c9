//! Integration coverage for the enforcement gate: real `.claude/contracts`
//! files on disk, driving `enforce_hook_input` through Write and Edit tool
//! calls end to end.

use phaser::plugins::enforce::{enforce_hook_input, format_hook_output, HookEvent, Severity};
use serde_json::json;
use std::fs;
use std::sync::Mutex;
use tempfile::tempdir;

// `contract_loader::load_contracts` reads $HOME for the user-level contracts
// directory; serialize tests that set it to avoid cross-test interference.
static HOME_LOCK: Mutex<()> = Mutex::new(());

fn write_project_contract(project_root: &std::path::Path, name: &str, yaml: &str) {
    let dir = project_root.join(".claude").join("contracts");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name), yaml).unwrap();
}

#[test]
fn write_tool_call_denied_when_content_matches_forbid_pattern() {
    let _guard = HOME_LOCK.lock().unwrap();
    let project = tempdir().unwrap();
    let empty_home = tempdir().unwrap();
    std::env::set_var("HOME", empty_home.path());

    write_project_contract(
        project.path(),
        "no-console-log.yaml",
        "rule_id: no-console-log\ntype: forbid_pattern\npattern: 'console\\.log'\nfile_glob: '**/*.ts'\nseverity: error\nmessage: console.log is not allowed\n",
    );

    let target = project.path().join("src/app.ts");
    fs::create_dir_all(target.parent().unwrap()).unwrap();

    let hook_input = json!({
        "hook_event_name": "PreToolUse",
        "tool_name": "Write",
        "tool_input": {
            "file_path": target.to_str().unwrap(),
            "content": "function main() {\n  console.log('hi');\n}\n",
        }
    });

    let result = enforce_hook_input(&hook_input, Some(project.path()), Severity::All);
    assert_eq!(result.decision, "deny");
    assert_eq!(result.violations.len(), 1);

    let output = format_hook_output(&result, HookEvent::PreToolUse).unwrap();
    assert_eq!(output["hookSpecificOutput"]["permissionDecision"], "deny");
}

#[test]
fn edit_tool_call_allowed_when_no_contract_matches() {
    let _guard = HOME_LOCK.lock().unwrap();
    let project = tempdir().unwrap();
    let empty_home = tempdir().unwrap();
    std::env::set_var("HOME", empty_home.path());

    write_project_contract(
        project.path(),
        "no-console-log.yaml",
        "rule_id: no-console-log\ntype: forbid_pattern\npattern: 'console\\.log'\nfile_glob: '**/*.ts'\nseverity: error\nmessage: console.log is not allowed\n",
    );

    let target = project.path().join("README.md");
    fs::write(&target, "# Hello\nOld line\n").unwrap();

    let hook_input = json!({
        "hook_event_name": "PreToolUse",
        "tool_name": "Edit",
        "tool_input": {
            "file_path": target.to_str().unwrap(),
            "old_str": "Old line",
            "new_str": "New line",
        }
    });

    let result = enforce_hook_input(&hook_input, Some(project.path()), Severity::All);
    assert_eq!(result.decision, "allow");
}

#[test]
fn envelope_cwd_resolves_contracts_even_when_fallback_root_differs() {
    let _guard = HOME_LOCK.lock().unwrap();
    let real_project = tempdir().unwrap();
    let unrelated_fallback = tempdir().unwrap();
    let empty_home = tempdir().unwrap();
    std::env::set_var("HOME", empty_home.path());

    write_project_contract(
        real_project.path(),
        "no-console-log.yaml",
        "rule_id: no-console-log\ntype: forbid_pattern\npattern: 'console\\.log'\nfile_glob: '**/*.ts'\nseverity: error\nmessage: console.log is not allowed\n",
    );

    let target = real_project.path().join("app.ts");

    let hook_input = json!({
        "hook_event_name": "PreToolUse",
        "tool_name": "Write",
        "tool_input": {
            "file_path": target.to_str().unwrap(),
            "content": "console.log('hi');\n",
        },
        "cwd": real_project.path().to_str().unwrap(),
    });

    // The process's own cwd (simulated here by an unrelated fallback root)
    // must not shadow the envelope's cwd.
    let result = enforce_hook_input(&hook_input, Some(unrelated_fallback.path()), Severity::All);
    assert_eq!(result.decision, "deny");
}

#[test]
fn warning_severity_filter_ignores_error_level_contracts() {
    let _guard = HOME_LOCK.lock().unwrap();
    let project = tempdir().unwrap();
    let empty_home = tempdir().unwrap();
    std::env::set_var("HOME", empty_home.path());

    write_project_contract(
        project.path(),
        "no-todo.yaml",
        "rule_id: no-todo\ntype: forbid_pattern\npattern: 'TODO'\nfile_glob: '**/*.py'\nseverity: error\nmessage: no TODOs\n",
    );

    let target = project.path().join("a.py");

    let hook_input = json!({
        "hook_event_name": "PreToolUse",
        "tool_name": "Write",
        "tool_input": {
            "file_path": target.to_str().unwrap(),
            "content": "# TODO: fix\n",
        }
    });

    let result = enforce_hook_input(&hook_input, Some(project.path()), Severity::Warning);
    assert_eq!(result.decision, "allow");
}

#[test]
fn post_tool_use_allow_yields_no_output() {
    let _guard = HOME_LOCK.lock().unwrap();
    let project = tempdir().unwrap();
    let empty_home = tempdir().unwrap();
    std::env::set_var("HOME", empty_home.path());

    let hook_input = json!({
        "hook_event_name": "PostToolUse",
        "tool_name": "Bash",
        "tool_input": {"command": "ls"}
    });

    let result = enforce_hook_input(&hook_input, Some(project.path()), Severity::All);
    assert_eq!(result.decision, "allow");
    assert!(format_hook_output(&result, HookEvent::PostToolUse).is_none());
}

#[test]
fn inline_ignore_directive_suppresses_an_otherwise_denied_write() {
    let _guard = HOME_LOCK.lock().unwrap();
    let project = tempdir().unwrap();
    let empty_home = tempdir().unwrap();
    std::env::set_var("HOME", empty_home.path());

    write_project_contract(
        project.path(),
        "no-todo.yaml",
        "rule_id: no-todo\ntype: forbid_pattern\npattern: 'TODO'\nfile_glob: '**/*.rs'\nseverity: error\nmessage: no TODOs\n",
    );

    let target = project.path().join("lib.rs");

    let hook_input = json!({
        "hook_event_name": "PreToolUse",
        "tool_name": "Write",
        "tool_input": {
            "file_path": target.to_str().unwrap(),
            "content": "fn main() {}\n// phaser:ignore-next-line no-todo\n// TODO remove this\n",
        }
    });

    let result = enforce_hook_input(&hook_input, Some(project.path()), Severity::All);
    assert_eq!(result.decision, "allow");
}
