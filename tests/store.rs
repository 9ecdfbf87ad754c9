//! Integration coverage for the `.phaser/` store: root resolution across the
//! `PHASER_STORAGE_DIR` override and directory layout, plus audit/event/config
//! CRUD exercised together rather than in isolation.

use std::sync::Mutex;

use phaser::core::store::{self, Store, STORAGE_DIR_ENV};
use serde_json::json;
use tempfile::tempdir;

// `find_phaser_root` reads a process-wide env var; serialize tests that touch it.
static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn env_override_resolves_before_project_or_home_lookup() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempdir().unwrap();
    std::env::set_var(STORAGE_DIR_ENV, dir.path());
    let resolved = store::find_phaser_root();
    std::env::remove_var(STORAGE_DIR_ENV);
    assert_eq!(resolved, dir.path());
}

#[test]
fn ensure_directories_creates_manifests_subdir() {
    let dir = tempdir().unwrap();
    let store = Store::new(Some(dir.path().to_path_buf()));
    store.ensure_directories().unwrap();
    assert!(dir.path().join("manifests").is_dir());
}

#[test]
fn audit_lifecycle_save_update_list() {
    let dir = tempdir().unwrap();
    let store = Store::new(Some(dir.path().to_path_buf()));

    let id = store
        .save_audit(json!({
            "project": "phaser",
            "slug": "rework-auth",
            "date": "2026-07-26",
            "status": "in_progress",
        }))
        .unwrap();

    store
        .update_audit(&id, &json!({"status": "complete"}))
        .unwrap();

    let fetched = store.get_audit(&id).unwrap().unwrap();
    assert_eq!(fetched["status"], "complete");

    let listed = store.list_audits(Some("phaser")).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(store.list_audits(Some("other-project")).unwrap().len(), 0);
}

#[test]
fn update_unknown_audit_returns_false() {
    let dir = tempdir().unwrap();
    let store = Store::new(Some(dir.path().to_path_buf()));
    let updated = store.update_audit("does-not-exist", &json!({"status": "x"})).unwrap();
    assert!(!updated);
}

#[test]
fn get_path_is_relative_to_root() {
    let dir = tempdir().unwrap();
    let store = Store::new(Some(dir.path().to_path_buf()));
    assert_eq!(store.get_path("contracts"), dir.path().join("contracts"));
}
