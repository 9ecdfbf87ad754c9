//! Parses inline `phaser:ignore` directives out of source files so the
//! enforcement gate can suppress specific violations.

use regex::Regex;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveScope {
    Line,
    NextLine,
}

#[derive(Debug, Clone)]
pub struct IgnoreDirective {
    /// Empty means "ignore all rules on this line".
    pub rule_ids: Vec<String>,
    pub line_number: usize,
    pub scope: DirectiveScope,
}

/// The minimal shape an enforcement violation needs to expose to be
/// filterable by ignore directives.
pub trait Ignorable {
    fn rule_id(&self) -> &str;
    fn line_number(&self) -> Option<usize>;
}

struct CommentStyle {
    extensions: &'static [&'static str],
    pattern: &'static str,
}

const COMMENT_STYLES: &[CommentStyle] = &[
    CommentStyle {
        extensions: &["py", "rb", "sh", "yaml", "yml", "toml"],
        pattern: r"#\s*phaser:(ignore(?:-next-line|-all)?)\s*([\w,\s-]*)",
    },
    CommentStyle {
        extensions: &[
            "js", "ts", "jsx", "tsx", "swift", "go", "rs", "c", "cpp", "java", "kt", "cs",
        ],
        pattern: r"//\s*phaser:(ignore(?:-next-line|-all)?)\s*([\w,\s-]*)",
    },
    CommentStyle {
        extensions: &["html", "xml", "vue", "svelte"],
        pattern: r"<!--\s*phaser:(ignore(?:-next-line|-all)?)\s*([\w,\s-]*)\s*-->",
    },
    CommentStyle {
        extensions: &["css", "scss", "less"],
        pattern: r"/\*\s*phaser:(ignore(?:-next-line|-all)?)\s*([\w,\s-]*)\s*\*/",
    },
];

fn comment_pattern_for(file_path: &str) -> Option<Regex> {
    let ext = Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())?;
    COMMENT_STYLES
        .iter()
        .find(|style| style.extensions.contains(&ext.as_str()))
        .map(|style| Regex::new(style.pattern).expect("static ignore pattern is valid"))
}

pub fn parse_ignores(content: &str, file_path: &str) -> Vec<IgnoreDirective> {
    let Some(pattern) = comment_pattern_for(file_path) else {
        return Vec::new();
    };

    let mut directives = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line_num = idx + 1;
        let Some(caps) = pattern.captures(line) else {

            continue;
        };
        let directive_type = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let rule_ids_str = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

        let rule_ids: Vec<String> = if directive_type == "ignore-all" || rule_ids_str.is_empty() {
            Vec::new()
        } else {
            rule_ids_str
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let scope = if directive_type == "ignore-next-line" {
            DirectiveScope::NextLine
        } else {
            DirectiveScope::Line
        };

        directives.push(IgnoreDirective {
            rule_ids,
            line_number: line_num,
            scope,
        });
    }
    directives
}

pub fn should_ignore(
    violation_rule_id: &str,
    violation_line: Option<usize>,
    directives: &[IgnoreDirective],
) -> bool {
    let Some(violation_line) = violation_line else {
        return false;
    };

    for directive in directives {
        let applies = match directive.scope {
            DirectiveScope::Line => directive.line_number == violation_line,
            DirectiveScope::NextLine => directive.line_number + 1 == violation_line,
        };
        if !applies {
            continue;
        }
        if directive.rule_ids.is_empty() || directive.rule_ids.iter().any(|r| r == violation_rule_id) {
            return true;
        }
    }
    false
}

/// Split violations into (remaining, ignored) based on directives found in
/// `content` for `file_path`.
pub fn filter_violations<V: Ignorable + Clone>(
    violations: &[V],
    file_path: &str,
    content: &str,
) -> (Vec<V>, Vec<V>) {
    let directives = parse_ignores(content, file_path);
    if directives.is_empty() {
        return (violations.to_vec(), Vec::new());
    }

    let mut remaining = Vec::new();
    let mut ignored = Vec::new();
    for v in violations {
        if should_ignore(v.rule_id(), v.line_number(), &directives) {
            ignored.push(v.clone());
        } else {
            remaining.push(v.clone());
        }
    }
    (remaining, ignored)
}
