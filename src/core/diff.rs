//! Diff engine: compares two manifests and renders unified-diff style hunks
//! for modified text files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::manifest::{FileEntry, FileKind, Manifest};

/// Skip content diffing for files larger than this, in bytes.
pub const DEFAULT_MAX_DIFF_SIZE: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change_type: ChangeType,
    pub before_hash: Option<String>,
    pub after_hash: Option<String>,
    pub before_size: Option<u64>,
    pub after_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_lines: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffResult {
    pub before_timestamp: String,
    pub after_timestamp: String,
    pub added: Vec<FileChange>,
    pub modified: Vec<FileChange>,
    pub deleted: Vec<FileChange>,
    pub unchanged_count: usize,
}

impl DiffResult {
    /// One-line summary, e.g. "+2 added, ~1 modified, -1 deleted".
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("+{} added", self.added.len()));
        }
        if !self.modified.is_empty() {
            parts.push(format!("~{} modified", self.modified.len()));
        }
        if !self.deleted.is_empty() {
            parts.push(format!("-{} deleted", self.deleted.len()));
        }
        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Full unified-diff style report.
    pub fn detailed(&self) -> String {
        let mut lines = Vec::new();

        for change in &self.added {
            lines.push(format!("Added: {}", change.path));
        }
        for change in &self.modified {
            lines.push(format!("Modified: {}", change.path));
            if let Some(diff) = &change.diff_lines {
                lines.extend(diff.iter().cloned());
            }
            lines.push(String::new());
        }
        for change in &self.deleted {
            lines.push(format!("Deleted: {}", change.path));
        }

        lines.join("\n")
    }
}

/// Compute a unified diff between two file contents using a longest-common-
/// subsequence alignment over lines, Python-`difflib`-style headers.
pub fn compute_file_diff(before_content: &str, after_content: &str, path: &str) -> Vec<String> {
    let before_lines: Vec<&str> = split_keep_lines(before_content);
    let after_lines: Vec<&str> = split_keep_lines(after_content);

    let ops = diff_ops(&before_lines, &after_lines);

    let mut out = vec![format!("--- a/{path}"), format!("+++ b/{path}")];
    out.extend(render_hunks(&before_lines, &after_lines, &ops));
    out
}

fn split_keep_lines(content: &str) -> Vec<&str> {
    if content.is_empty() {
        return Vec::new();
    }
    content.split_inclusive('\n').collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffOp {
    Equal,
    Delete,
    Insert,
}

/// Classic LCS-table line diff. Quadratic in the input size, which is fine
/// for the file sizes this tool actually diffs (capped by `DEFAULT_MAX_DIFF_SIZE`).
fn diff_ops(a: &[&str], b: &[&str]) -> Vec<(DiffOp, usize, usize)> {
    let (n, m) = (a.len(), b.len());
    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            ops.push((DiffOp::Equal, i, j));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push((DiffOp::Delete, i, j));
            i += 1;
        } else {
            ops.push((DiffOp::Insert, i, j));
            j += 1;
        }
    }
    while i < n {
        ops.push((DiffOp::Delete, i, j));
        i += 1;
    }
    while j < m {
        ops.push((DiffOp::Insert, i, j));
        j += 1;
    }
    ops
}

/// Lines of context kept before/after each run of changes, matching Python
/// `difflib.unified_diff`'s default `n=3`.
const HUNK_CONTEXT: usize = 3;

/// Render ops as one or more windowed unified-diff hunks: each contiguous
/// run of changes keeps up to `HUNK_CONTEXT` lines of surrounding context,
/// and runs closer together than `2 * HUNK_CONTEXT` are merged into a single
/// hunk rather than split, same as `difflib.unified_diff(n=3)`.
fn render_hunks(a: &[&str], b: &[&str], ops: &[(DiffOp, usize, usize)]) -> Vec<String> {
    let mut lines = Vec::new();

    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut idx = 0;
    while idx < ops.len() {
        if ops[idx].0 != DiffOp::Equal {
            let start = idx;
            while idx < ops.len() && ops[idx].0 != DiffOp::Equal {
                idx += 1;
            }
            runs.push((start, idx));
        } else {
            idx += 1;
        }
    }
    if runs.is_empty() {
        return lines;
    }

    let mut groups: Vec<Vec<(usize, usize)>> = Vec::new();
    for run in runs {
        if let Some(last_group) = groups.last_mut() {
            let last_run_end = last_group.last().unwrap().1;
            if run.0 - last_run_end <= 2 * HUNK_CONTEXT {
                last_group.push(run);
                continue;
            }
        }
        groups.push(vec![run]);
    }

    for group in &groups {
        let first_start = group.first().unwrap().0;
        let last_end = group.last().unwrap().1;
        let hunk_start = first_start.saturating_sub(HUNK_CONTEXT);
        let hunk_end = (last_end + HUNK_CONTEXT).min(ops.len());

        let a_start = ops[hunk_start].1;
        let b_start = ops[hunk_start].2;
        let a_count = ops[hunk_start..hunk_end]
            .iter()
            .filter(|(op, _, _)| *op != DiffOp::Insert)
            .count();
        let b_count = ops[hunk_start..hunk_end]
            .iter()
            .filter(|(op, _, _)| *op != DiffOp::Delete)
            .count();

        lines.push(format!(
            "@@ -{} +{} @@",
            format_range(a_start, a_count),
            format_range(b_start, b_count)
        ));

        for (op, i, j) in &ops[hunk_start..hunk_end] {
            let (prefix, text) = match op {
                DiffOp::Equal => (' ', a[*i]),
                DiffOp::Delete => ('-', a[*i]),
                DiffOp::Insert => ('+', b[*j]),
            };
            lines.push(format!("{prefix}{}", text.trim_end_matches('\n')));
        }
    }

    lines
}

/// Format a hunk-header line range the way `difflib._format_range_unified`
/// does: a single number when the range covers exactly one line, `start,0`
/// shifted back by one when it covers none.
fn format_range(start: usize, length: usize) -> String {
    if length == 1 {
        format!("{}", start + 1)
    } else if length == 0 {
        format!("{start}")
    } else {
        format!("{},{length}", start + 1)
    }
}

/// Compare two manifests and return the set of added/modified/deleted files.
pub fn compare_manifests(
    before: &Manifest,
    after: &Manifest,
    include_diff: bool,
    max_diff_size: u64,
) -> DiffResult {
    let before_map: HashMap<&str, &FileEntry> =
        before.files.iter().map(|f| (f.path.as_str(), f)).collect();
    let after_map: HashMap<&str, &FileEntry> =
        after.files.iter().map(|f| (f.path.as_str(), f)).collect();

    let mut added_paths: Vec<&str> = after_map
        .keys()
        .filter(|p| !before_map.contains_key(*p))
        .copied()
        .collect();
    added_paths.sort();

    let mut deleted_paths: Vec<&str> = before_map
        .keys()
        .filter(|p| !after_map.contains_key(*p))
        .copied()
        .collect();
    deleted_paths.sort();

    let mut common_paths: Vec<&str> = before_map
        .keys()
        .filter(|p| after_map.contains_key(*p))
        .copied()
        .collect();
    common_paths.sort();

    let added = added_paths
        .into_iter()
        .map(|path| {
            let entry = after_map[path];
            FileChange {
                path: path.to_string(),
                change_type: ChangeType::Added,
                before_hash: None,
                after_hash: Some(entry.sha256.clone()),
                before_size: None,
                after_size: Some(entry.size),
                diff_lines: None,
            }
        })
        .collect();

    let deleted = deleted_paths
        .into_iter()
        .map(|path| {
            let entry = before_map[path];
            FileChange {
                path: path.to_string(),
                change_type: ChangeType::Deleted,
                before_hash: Some(entry.sha256.clone()),
                after_hash: None,
                before_size: Some(entry.size),
                after_size: None,
                diff_lines: None,
            }
        })
        .collect();

    let mut unchanged_count = 0;
    let mut modified = Vec::new();
    for path in common_paths {
        let before_entry = before_map[path];
        let after_entry = after_map[path];

        if before_entry.sha256 == after_entry.sha256 {
            unchanged_count += 1;
            continue;
        }

        let diff_lines = if include_diff {
            diff_lines_for(before_entry, after_entry, path, max_diff_size)
        } else {
            None
        };

        modified.push(FileChange {
            path: path.to_string(),
            change_type: ChangeType::Modified,
            before_hash: Some(before_entry.sha256.clone()),
            after_hash: Some(after_entry.sha256.clone()),
            before_size: Some(before_entry.size),
            after_size: Some(after_entry.size),
            diff_lines,
        });
    }

    DiffResult {
        before_timestamp: before.timestamp.clone(),
        after_timestamp: after.timestamp.clone(),
        added,
        modified,
        deleted,
        unchanged_count,
    }
}

fn diff_lines_for(
    before: &FileEntry,
    after: &FileEntry,
    path: &str,
    max_diff_size: u64,
) -> Option<Vec<String>> {
    if before.kind == FileKind::Binary || after.kind == FileKind::Binary {
        return Some(vec!["(binary file changed)".to_string()]);
    }
    match (&before.content, &after.content) {
        (Some(before_text), Some(after_text)) => {
            if before.size > max_diff_size || after.size > max_diff_size {
                Some(vec!["(diff skipped: file too large)".to_string()])
            } else {
                Some(compute_file_diff(before_text, after_text, path))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn manifest_with(files: Vec<FileEntry>, timestamp: &str) -> Manifest {
        Manifest {
            root: "/tmp".to_string(),
            timestamp: timestamp.to_string(),
            file_count: files.len(),
            total_size_bytes: files.iter().map(|f| f.size).sum(),
            files,
        }
    }

    fn text_entry(path: &str, content: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            kind: FileKind::Text,
            size: content.len() as u64,
            sha256: super::super::manifest::compute_file_hash(content.as_bytes()),
            content: Some(content.to_string()),
            is_executable: false,
        }
    }

    #[test]
    fn compare_classifies_added_modified_deleted() {
        let before = manifest_with(
            vec![text_entry("a.txt", "one\n"), text_entry("b.txt", "same\n")],
            "t0",
        );
        let after = manifest_with(
            vec![text_entry("b.txt", "same\n"), text_entry("c.txt", "new\n")],
            "t1",
        );

        let result = compare_manifests(&before, &after, true, DEFAULT_MAX_DIFF_SIZE);

        assert_eq!(result.added.len(), 1);
        assert_eq!(result.added[0].path, "c.txt");
        assert_eq!(result.deleted.len(), 1);
        assert_eq!(result.deleted[0].path, "a.txt");
        assert_eq!(result.unchanged_count, 1);
        assert_eq!(result.modified.len(), 0);
    }

    #[test]
    fn compare_computes_diff_for_modified_text_file() {
        let before = manifest_with(vec![text_entry("a.txt", "line1\nline2\n")], "t0");
        let after = manifest_with(vec![text_entry("a.txt", "line1\nline2 changed\n")], "t1");

        let result = compare_manifests(&before, &after, true, DEFAULT_MAX_DIFF_SIZE);

        assert_eq!(result.modified.len(), 1);
        let diff = result.modified[0].diff_lines.as_ref().unwrap();
        assert!(diff.iter().any(|l| l.starts_with("-line2")));
        assert!(diff.iter().any(|l| l.starts_with("+line2 changed")));
    }

    #[test]
    fn distant_changes_split_into_separate_windowed_hunks() {
        let mut before_lines = vec!["ctx\n".to_string(); 30];
        before_lines[5] = "before-a\n".to_string();
        before_lines[25] = "before-b\n".to_string();
        let before_content: String = before_lines.concat();

        let mut after_lines = before_lines.clone();
        after_lines[5] = "after-a\n".to_string();
        after_lines[25] = "after-b\n".to_string();
        let after_content: String = after_lines.concat();

        let diff = compute_file_diff(&before_content, &after_content, "far.txt");
        let hunk_headers: Vec<&String> = diff.iter().filter(|l| l.starts_with("@@")).collect();

        assert_eq!(hunk_headers.len(), 2, "changes far apart should not share a hunk");
        // Each hunk carries 3 lines of context before/after its change, not the
        // whole 30-line file.
        let first_hunk_len = diff
            .iter()
            .skip(1)
            .take_while(|l| !l.starts_with("@@"))
            .count();
        assert!(first_hunk_len < 15, "hunk should be windowed, got {first_hunk_len} lines");
    }

    #[test]
    fn nearby_changes_merge_into_one_hunk() {
        let before = "a\nb\nc\nd\ne\nf\ng\n";
        let after = "a\nX\nc\nd\ne\nY\ng\n";

        let diff = compute_file_diff(before, after, "near.txt");
        let hunk_headers: Vec<&String> = diff.iter().filter(|l| l.starts_with("@@")).collect();

        assert_eq!(hunk_headers.len(), 1, "changes within 2*context lines should merge");
    }

    #[test]
    fn diff_skipped_message_for_oversized_files() {
        let entry_before = FileEntry {
            size: 200,
            ..text_entry("big.txt", "x")
        };
        let entry_after = FileEntry {
            size: 200,
            sha256: "different".to_string(),
            ..text_entry("big.txt", "y")
        };
        let lines = diff_lines_for(&entry_before, &entry_after, "big.txt", 100).unwrap();
        assert_eq!(lines, vec!["(diff skipped: file too large)"]);
    }

    #[test]
    fn summary_reports_no_changes_when_empty() {
        let result = DiffResult {
            before_timestamp: "t0".into(),
            after_timestamp: "t1".into(),
            added: vec![],
            modified: vec![],
            deleted: vec![],
            unchanged_count: 3,
        };
        assert_eq!(result.summary(), "No changes");
    }

    #[test]
    fn is_binary_file_detects_extension() {
        assert!(super::super::manifest::is_binary_file(
            Path::new("x.png"),
            b"whatever"
        ));
    }
}
