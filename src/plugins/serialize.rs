//! Dependency-free workspace serializer: walks a directory respecting
//! `.gitignore` and a conservative hidden-file allowlist, producing a
//! manifest-shaped YAML document without going through `serde_yaml` — this
//! mirrors the original standalone tool's own zero-dependency contract, kept
//! here as an interoperable fallback output format.

use std::path::{Path, PathBuf};

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::core::time::now_iso_millis;

pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    ".DS_Store",
    ".idea",
    ".vscode",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
    ".coverage",
    "htmlcov",
    "node_modules",
    ".venv",
    "venv",
    "env",
    ".audit",
    ".env",
    "*.egg-info",
    "dist",
    "build",
];

pub const ALLOWED_HIDDEN_DIRS: &[&str] = &[".github", ".config", ".circleci"];

pub const ALLOWED_HIDDEN_FILES: &[&str] = &[
    ".gitignore",
    ".gitattributes",
    ".editorconfig",
    ".prettierrc",
    ".eslintrc",
    ".dockerignore",
];

pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const MAX_TOTAL_SIZE: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct FileNode {
    pub path: String,
    pub file_type: &'static str,
    pub size: u64,
    pub sha256: String,
    pub content: String,
    pub is_executable: bool,
}

#[derive(Debug, Clone)]
pub struct SerializedWorkspace {
    pub root: String,
    pub timestamp: String,
    pub file_count: usize,
    pub total_size_bytes: u64,
    pub files: Vec<FileNode>,
}

pub fn parse_gitignore(root: &Path) -> Vec<String> {
    let path = root.join(".gitignore");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Shell-style glob match (`*`, `?`) against a single path component or
/// whole relative path, matching Python `fnmatch.fnmatch` semantics closely
/// enough for the simplified gitignore support this tool offers.
fn fnmatch(name: &str, pattern: &str) -> bool {
    fn go(name: &[u8], pattern: &[u8]) -> bool {
        match (name.first(), pattern.first()) {
            (_, Some(b'*')) => {
                go(name, &pattern[1..]) || (!name.is_empty() && go(&name[1..], pattern))
            }
            (Some(_), Some(b'?')) => go(&name[1..], &pattern[1..]),
            (Some(n), Some(p)) if n == p => go(&name[1..], &pattern[1..]),
            (None, None) => true,
            _ => false,
        }
    }
    go(name.as_bytes(), pattern.as_bytes())
}

fn matches_gitignore(relative_path: &str, pattern: &str) -> bool {
    if pattern.starts_with('!') {
        return false;
    }

    if let Some(dir_pattern) = pattern.strip_suffix('/') {
        let parts: Vec<&str> = relative_path.split('/').collect();
        if parts.len() <= 1 {
            return false;
        }
        return parts[..parts.len() - 1].iter().any(|part| fnmatch(part, dir_pattern));
    }

    if let Some(rooted) = pattern.strip_prefix('/') {
        return fnmatch(relative_path, rooted);
    }

    if pattern.contains('/') {
        return fnmatch(relative_path, pattern);
    }

    let basename = relative_path.rsplit('/').next().unwrap_or(relative_path);
    if fnmatch(basename, pattern) {
        return true;
    }
    relative_path.split('/').any(|part| fnmatch(part, pattern))
}

fn is_ignored(relative_path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| matches_gitignore(relative_path, p))
}

fn matches_any_glob_exclude(name: &str) -> bool {
    DEFAULT_EXCLUDES
        .iter()
        .any(|exclude| exclude.contains('*') && fnmatch(name, exclude))
}

fn should_include_directory(name: &str, rel_path: &str, patterns: &[String]) -> bool {
    if DEFAULT_EXCLUDES.contains(&name) || matches_any_glob_exclude(name) {
        return false;
    }
    if name.starts_with('.') && !ALLOWED_HIDDEN_DIRS.contains(&name) {
        return false;
    }
    let dir_rel = format!("{}/", rel_path.trim_end_matches('/'));
    if is_ignored(rel_path.trim_end_matches('/'), patterns) || is_ignored(&dir_rel, patterns) {
        return false;
    }
    true
}

fn should_include_file(name: &str, rel_path: &str, patterns: &[String]) -> bool {
    if DEFAULT_EXCLUDES.contains(&name) {
        return false;
    }
    if name.starts_with('.') && !ALLOWED_HIDDEN_FILES.contains(&name) {
        return false;
    }
    !is_ignored(rel_path, patterns)
}

pub fn collect_files(root: &Path, patterns: &[String]) -> Vec<PathBuf> {
    let mut collected = Vec::new();
    walk(root, root, patterns, &mut collected);
    collected
}

fn walk(dir: &Path, root: &Path, patterns: &[String], out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    let rel_dir = dir.strip_prefix(root).unwrap_or(Path::new(""));
    let rel_dir_str = rel_dir.to_string_lossy().replace('\\', "/");

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        let Ok(file_type) = entry.file_type() else { continue };
        if file_type.is_dir() {
            dirs.push((name, entry.path()));
        } else if file_type.is_file() {
            files.push((name, entry.path()));
        }
    }

    for (name, path) in files {
        let rel_path = if rel_dir_str.is_empty() {
            name.clone()
        } else {
            format!("{rel_dir_str}/{name}")
        };
        if should_include_file(&name, &rel_path, patterns) {
            out.push(path);
        }
    }

    for (name, path) in dirs {
        let rel_path = if rel_dir_str.is_empty() {
            name.clone()
        } else {
            format!("{rel_dir_str}/{name}")
        };
        if should_include_directory(&name, &rel_path, patterns) {
            walk(&path, root, patterns, out);
        }
    }
}

pub fn read_file_node(path: &Path, root: &Path) -> Option<FileNode> {
    let metadata = std::fs::metadata(path).ok()?;
    if metadata.len() > MAX_FILE_SIZE {
        eprintln!(
            "Warning: skipping {} ({} bytes exceeds {} limit)",
            path.display(),
            metadata.len(),
            MAX_FILE_SIZE
        );
        return None;
    }

    let raw_bytes = std::fs::read(path).ok()?;

    let (content, file_type) = match String::from_utf8(raw_bytes.clone()) {
        Ok(text) => (text, "text"),
        Err(_) => (
            base64::engine::general_purpose::STANDARD.encode(&raw_bytes),
            "binary",
        ),
    };

    let mut hasher = Sha256::new();
    hasher.update(&raw_bytes);
    let sha256 = format!("{:x}", hasher.finalize());

    let relative = path.strip_prefix(root).ok()?.to_string_lossy().replace('\\', "/");
    let is_executable = is_executable(&metadata);

    Some(FileNode {
        path: relative,
        file_type,
        size: metadata.len(),
        sha256,
        content,
        is_executable,
    })
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

pub fn serialize_workspace(root: &Path) -> Result<SerializedWorkspace, String> {
    let root = root
        .canonicalize()
        .map_err(|e| format!("cannot resolve {}: {e}", root.display()))?;
    if !root.is_dir() {
        return Err(format!("not a directory: {}", root.display()));
    }

    let patterns = parse_gitignore(&root);
    let paths = collect_files(&root, &patterns);

    let mut nodes = Vec::new();
    let mut total_size = 0u64;
    for path in paths {
        if total_size > MAX_TOTAL_SIZE {
            eprintln!("Warning: total size exceeds {MAX_TOTAL_SIZE} bytes, stopping collection");
            break;
        }
        if let Some(node) = read_file_node(&path, &root) {
            total_size += node.size;
            nodes.push(node);
        }
    }

    Ok(SerializedWorkspace {
        root: root.to_string_lossy().to_string(),
        timestamp: now_iso_millis(),
        file_count: nodes.len(),
        total_size_bytes: total_size,
        files: nodes,
    })
}

/// Escape a scalar for safe single-line YAML output. Deliberately hand-rolled
/// rather than routed through `serde_yaml`, matching the format's own
/// zero-dependency design.
pub fn yaml_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }

    let lower = s.to_lowercase();
    let mut needs_quotes = matches!(
        lower.as_str(),
        "true" | "false" | "null" | "yes" | "no" | "on" | "off" | "~"
    );

    if let Some(first) = s.chars().next() {
        if " -?:,[]{}#&*!|>'\"%@`".contains(first) {
            needs_quotes = true;
        }
    }
    if s.chars().any(|c| ":#[]{},".contains(c)) {
        needs_quotes = true;
    }
    if s.ends_with(' ') {
        needs_quotes = true;
    }
    if s.parse::<f64>().is_ok() {
        needs_quotes = true;
    }

    if needs_quotes {
        format!("'{}'", s.replace('\'', "''"))
    } else {
        s.to_string()
    }
}

pub fn to_yaml(workspace: &SerializedWorkspace) -> String {
    let mut lines = vec![
        format!("root: {}", yaml_escape(&workspace.root)),
        format!("timestamp: '{}'", workspace.timestamp),
        format!("file_count: {}", workspace.file_count),
        format!("total_size_bytes: {}", workspace.total_size_bytes),
        "files:".to_string(),
    ];

    for node in &workspace.files {
        lines.push(format!("  - path: {}", yaml_escape(&node.path)));
        lines.push(format!("    type: {}", node.file_type));
        lines.push(format!("    size: {}", node.size));
        lines.push(format!("    sha256: {}", node.sha256));

        if node.content.is_empty() {
            lines.push("    content: ''".to_string());
        } else if node.content.contains('\n') || node.content.len() > 80 {
            lines.push("    content: |".to_string());
            for content_line in node.content.split('\n') {
                lines.push(format!("      {content_line}"));
            }
        } else {
            lines.push(format!("    content: {}", yaml_escape(&node.content)));
        }

        lines.push(format!("    is_executable: {}", node.is_executable));
    }

    lines.join("\n") + "\n"
}
