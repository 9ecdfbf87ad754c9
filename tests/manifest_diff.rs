//! Integration coverage linking manifest capture to the diff engine: capture
//! a tree, mutate it, capture again, and compare.

use phaser::core::diff::{compare_manifests, ChangeType, DEFAULT_MAX_DIFF_SIZE};
use phaser::core::manifest::{capture_manifest, Manifest};
use std::fs;
use tempfile::tempdir;

#[test]
fn capture_mutate_capture_compare_round_trip() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("keep.txt"), "unchanged\n").unwrap();
    fs::write(dir.path().join("old.txt"), "will be deleted\n").unwrap();
    fs::write(dir.path().join("edit.txt"), "line one\nline two\n").unwrap();

    let pre = capture_manifest(dir.path(), None).unwrap();

    fs::remove_file(dir.path().join("old.txt")).unwrap();
    fs::write(dir.path().join("edit.txt"), "line one\nline two changed\n").unwrap();
    fs::write(dir.path().join("new.txt"), "brand new\n").unwrap();

    let post = capture_manifest(dir.path(), None).unwrap();

    let result = compare_manifests(&pre, &post, true, DEFAULT_MAX_DIFF_SIZE);

    assert_eq!(result.added.len(), 1);
    assert_eq!(result.added[0].path, "new.txt");
    assert_eq!(result.added[0].change_type, ChangeType::Added);

    assert_eq!(result.deleted.len(), 1);
    assert_eq!(result.deleted[0].path, "old.txt");

    assert_eq!(result.modified.len(), 1);
    assert_eq!(result.modified[0].path, "edit.txt");
    let diff = result.modified[0].diff_lines.as_ref().unwrap();
    assert!(diff.iter().any(|l| l.starts_with("+line two changed")));

    assert_eq!(result.unchanged_count, 1);
    assert_eq!(result.summary(), "+1 added, ~1 modified, -1 deleted");
}

#[test]
fn manifest_persists_through_save_and_load_for_later_comparison() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), "hello").unwrap();
    let manifest = capture_manifest(dir.path(), None).unwrap();

    let pre_path = dir.path().join("pre.yaml");
    manifest.save(&pre_path).unwrap();

    fs::write(dir.path().join("a.txt"), "hello world").unwrap();
    let post = capture_manifest(dir.path(), None).unwrap();
    let post_path = dir.path().join("post.yaml");
    post.save(&post_path).unwrap();

    let loaded_pre = Manifest::load(&pre_path).unwrap();
    let loaded_post = Manifest::load(&post_path).unwrap();

    let result = compare_manifests(&loaded_pre, &loaded_post, false, DEFAULT_MAX_DIFF_SIZE);
    assert_eq!(result.modified.len(), 1);
    assert!(result.modified[0].diff_lines.is_none());
}

#[test]
fn custom_exclude_patterns_are_respected() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("scratch")).unwrap();
    fs::write(dir.path().join("scratch/ignored.txt"), "x").unwrap();
    fs::write(dir.path().join("kept.txt"), "y").unwrap();

    let manifest = capture_manifest(dir.path(), Some(vec!["scratch".to_string()])).unwrap();
    let paths: Vec<&str> = manifest.files.iter().map(|f| f.path.as_str()).collect();

    assert_eq!(paths, vec!["kept.txt"]);
}
