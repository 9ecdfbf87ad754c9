//! Manifest capture: a content-addressed snapshot of a directory tree.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::PhaserError;
use super::time::now_iso_millis;

/// Extensions always treated as binary, regardless of content.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "bmp", "webp", "pdf", "zip", "tar", "gz", "bz2", "xz",
    "7z", "rar", "exe", "dll", "so", "dylib", "a", "o", "woff", "woff2", "ttf", "eot", "otf",
    "mp3", "mp4", "wav", "avi", "mov", "mkv", "pyc", "pyo", "class", "jar", "db", "sqlite",
    "sqlite3",
];

/// Directory/path-prefix patterns excluded from manifest capture by default.
/// Shared by audit hooks — `.phaser` is already part of this base set, so no
/// separate override is needed for the store's own directory.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    ".git",
    ".audit",
    ".phaser",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
    "node_modules",
    ".venv",
    "venv",
    ".DS_Store",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Text,
    Binary,
}

/// A single file captured in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub size: u64,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub is_executable: bool,
}

/// Snapshot of a directory's state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub root: String,
    pub timestamp: String,
    pub file_count: usize,
    pub total_size_bytes: u64,
    pub files: Vec<FileEntry>,
}

impl Manifest {
    pub fn save(&self, path: &Path) -> Result<(), PhaserError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, PhaserError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

/// Determine if a file is binary based on extension or a NUL byte in the
/// first 8KB of content.
pub fn is_binary_file(path: &Path, content: &[u8]) -> bool {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if BINARY_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
            return true;
        }
    }
    let sample = &content[..content.len().min(8192)];
    sample.contains(&0u8)
}

pub fn compute_file_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Whether `path` (relative to `root`) matches any exclude pattern, either
/// as a full path component or as a prefix of the relative path string.
pub fn should_exclude(path: &Path, root: &Path, exclude_patterns: &[String]) -> bool {
    let rel_path = match path.strip_prefix(root) {
        Ok(p) => p,
        Err(_) => return true,
    };
    let rel_str = rel_path.to_string_lossy().replace('\\', "/");
    let parts: BTreeSet<&str> = rel_path
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();

    exclude_patterns
        .iter()
        .any(|pattern| parts.contains(pattern.as_str()) || rel_str.starts_with(pattern.as_str()))
}

/// Walk `root`, pruning excluded directories, collecting every eligible
/// regular file's relative path sorted deterministically.
fn walk_files(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, PhaserError> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries: Vec<_> = std::fs::read_dir(&dir)?.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());

        let mut subdirs = Vec::new();
        for entry in entries {
            let path = entry.path();
            let file_type = entry.file_type()?;

            if should_exclude(&path, root, patterns) {
                continue;
            }

            if file_type.is_dir() {
                subdirs.push(path);
            } else if file_type.is_file() {
                out.push(path);
            }
        }
        // Push in reverse so directory traversal stays close to sorted order.
        subdirs.reverse();
        stack.extend(subdirs);
    }

    out.sort();
    Ok(out)
}

/// Capture the current state of `root` as a manifest.
pub fn capture_manifest(root: &Path, exclude_patterns: Option<Vec<String>>) -> Result<Manifest, PhaserError> {
    let root = root
        .canonicalize()
        .map_err(|e| PhaserError::PathError(format!("cannot resolve {}: {e}", root.display())))?;
    if !root.is_dir() {
        return Err(PhaserError::PathError(format!("not a directory: {}", root.display())));
    }

    let patterns = exclude_patterns.unwrap_or_else(|| {
        DEFAULT_EXCLUDE_PATTERNS.iter().map(|s| s.to_string()).collect()
    });

    let paths = walk_files(&root, &patterns)?;

    let entries: Vec<FileEntry> = paths
        .par_iter()
        .filter_map(|path| build_entry(path, &root).ok().flatten())
        .collect();

    let mut entries = entries;
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let total_size_bytes: u64 = entries.iter().map(|f| f.size).sum();

    Ok(Manifest {
        root: root.to_string_lossy().to_string(),
        timestamp: now_iso_millis(),
        file_count: entries.len(),
        total_size_bytes,
        files: entries,
    })
}

fn build_entry(path: &Path, root: &Path) -> Result<Option<FileEntry>, PhaserError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(None),
    };
    if !metadata.is_file() {
        return Ok(None);
    }

    let raw_bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(_) => return Ok(None),
    };

    let sha256 = compute_file_hash(&raw_bytes);
    let mut is_binary = is_binary_file(path, &raw_bytes);
    let is_executable = is_executable(&metadata);

    let content = if is_binary {
        None
    } else {
        match String::from_utf8(raw_bytes.clone()) {
            Ok(text) => Some(text),
            Err(_) => {
                is_binary = true;
                None
            }
        }
    };

    let rel_path = path
        .strip_prefix(root)
        .map_err(|_| PhaserError::PathError(format!("{} escapes root", path.display())))?
        .to_string_lossy()
        .replace('\\', "/");

    Ok(Some(FileEntry {
        path: rel_path,
        kind: if is_binary { FileKind::Binary } else { FileKind::Text },
        size: metadata.len(),
        sha256,
        content,
        is_executable,
    }))
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn capture_skips_excluded_dirs_and_sorts_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/ignored"), "x").unwrap();

        let manifest = capture_manifest(dir.path(), None).unwrap();
        let paths: Vec<&str> = manifest.files.iter().map(|f| f.path.as_str()).collect();

        assert_eq!(paths, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn binary_detection_by_extension_and_nul_byte() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("image.png");
        fs::write(&png, b"not really png bytes").unwrap();
        let bin = dir.path().join("blob.dat");
        fs::write(&bin, b"has\x00nul").unwrap();
        let text = dir.path().join("notes.txt");
        fs::write(&text, b"hello world").unwrap();

        let manifest = capture_manifest(dir.path(), None).unwrap();
        let by_path = |p: &str| manifest.files.iter().find(|f| f.path == p).unwrap();

        assert_eq!(by_path("image.png").kind, FileKind::Binary);
        assert_eq!(by_path("blob.dat").kind, FileKind::Binary);
        assert_eq!(by_path("notes.txt").kind, FileKind::Text);
    }

    #[test]
    fn manifest_roundtrips_through_yaml() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f.txt"), "hi").unwrap();
        let manifest = capture_manifest(dir.path(), None).unwrap();

        let out_path = dir.path().join("manifest.yaml");
        manifest.save(&out_path).unwrap();
        let loaded = Manifest::load(&out_path).unwrap();

        assert_eq!(loaded.file_count, manifest.file_count);
        assert_eq!(loaded.files[0].sha256, manifest.files[0].sha256);
    }
}
