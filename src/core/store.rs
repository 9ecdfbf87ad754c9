//! Persistent storage in a `.phaser/` directory for audits, events, and
//! configuration.
//!
//! Supports both a global store (`~/.phaser/`) and a project-local store
//! (`<project>/.phaser/`), picked automatically unless overridden.

use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use serde_json::{json, Value};

use super::error::PhaserError;

/// Environment variable that forces the storage root, bypassing auto-detection.
pub const STORAGE_DIR_ENV: &str = "PHASER_STORAGE_DIR";

const MAX_RETRIES: usize = 3;
const RETRY_DELAYS_MS: [u64; 3] = [100, 300, 1000];

/// Default configuration merged underneath whatever the user has saved.
pub fn default_config() -> Value {
    json!({
        "version": 1,
        "storage": {
            "location": "global",
            "max_events": 10000,
            "retention_days": 90,
        },
        "features": {
            "diffs": true,
            "contracts": true,
            "simulation": true,
            "branches": true,
        },
        "display": {
            "verbose": false,
            "color": "auto",
        },
    })
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn global_phaser_dir() -> PathBuf {
    home_dir().join(".phaser")
}

/// Walk up from the current directory looking for a `.phaser/` folder,
/// stopping at the home directory or filesystem root.
fn project_phaser_dir() -> Option<PathBuf> {
    let home = home_dir();
    let current = std::env::current_dir().ok()?;
    let mut dir = current.as_path();
    loop {
        let candidate = dir.join(".phaser");
        if candidate.is_dir() {
            return Some(candidate);
        }
        if dir == home {
            return None;
        }
        match dir.parent() {
            Some(parent) if parent != dir => dir = parent,
            _ => return None,
        }
    }
}

/// Resolution order: `PHASER_STORAGE_DIR` env var, then a project-local
/// `.phaser/`, then the global `~/.phaser/`.
pub fn find_phaser_root() -> PathBuf {
    if let Ok(dir) = std::env::var(STORAGE_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    project_phaser_dir().unwrap_or_else(global_phaser_dir)
}

/// CRUD access to the `.phaser/` store: audits, the event log, and config.
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Open storage at an explicit root, or auto-detect when `None`.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root: root.unwrap_or_else(find_phaser_root),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn audits_file(&self) -> PathBuf {
        self.root.join("audits.json")
    }

    fn events_file(&self) -> PathBuf {
        self.root.join("events.json")
    }

    fn config_file(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn get_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn ensure_directories(&self) -> Result<(), PhaserError> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.root.join("manifests"))?;
        Ok(())
    }

    // -- Audit operations ---------------------------------------------------

    /// Save a new audit record, generating an `id` if absent. Returns the id.
    pub fn save_audit(&self, mut audit: Value) -> Result<String, PhaserError> {
        self.ensure_directories()?;

        let obj = audit.as_object_mut().ok_or_else(|| {
            PhaserError::ValidationError("audit record must be an object".into())
        })?;
        if !obj.contains_key("id") {
            obj.insert("id".into(), json!(uuid::Uuid::new_v4().to_string()));
        }

        let required = ["project", "slug", "date", "status"];
        let missing: Vec<&str> = required
            .iter()
            .filter(|f| !obj.contains_key(**f))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(PhaserError::ValidationError(format!(
                "Missing required audit fields: {:?}",
                missing
            )));
        }

        let id = obj.get("id").unwrap().as_str().unwrap().to_string();

        let mut data =
            self.read_json(&self.audits_file(), || json!({"version": 1, "audits": []}))?;
        data["audits"].as_array_mut().unwrap().push(audit);
        self.write_json(&self.audits_file(), &data)?;

        Ok(id)
    }

    pub fn get_audit(&self, audit_id: &str) -> Result<Option<Value>, PhaserError> {
        let data =
            self.read_json(&self.audits_file(), || json!({"version": 1, "audits": []}))?;
        Ok(data["audits"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|a| a.get("id").and_then(Value::as_str) == Some(audit_id))
            .cloned())
    }

    pub fn list_audits(&self, project: Option<&str>) -> Result<Vec<Value>, PhaserError> {
        let data =
            self.read_json(&self.audits_file(), || json!({"version": 1, "audits": []}))?;
        let audits = data["audits"].as_array().cloned().unwrap_or_default();
        Ok(match project {
            Some(p) => audits
                .into_iter()
                .filter(|a| a.get("project").and_then(Value::as_str) == Some(p))
                .collect(),
            None => audits,
        })
    }

    pub fn update_audit(&self, audit_id: &str, updates: &Value) -> Result<bool, PhaserError> {
        let mut data =
            self.read_json(&self.audits_file(), || json!({"version": 1, "audits": []}))?;
        let audits = data["audits"].as_array_mut().unwrap();
        for audit in audits.iter_mut() {
            if audit.get("id").and_then(Value::as_str) == Some(audit_id) {
                if let (Some(target), Some(src)) = (audit.as_object_mut(), updates.as_object()) {
                    for (k, v) in src {
                        target.insert(k.clone(), v.clone());
                    }
                }
                self.write_json(&self.audits_file(), &data)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    // -- Event operations -----------------------------------------------------

    pub fn append_event(&self, event: Value) -> Result<(), PhaserError> {
        self.ensure_directories()?;

        let required = ["id", "type", "timestamp", "audit_id"];
        let missing: Vec<&str> = required
            .iter()
            .filter(|f| event.get(**f).is_none())
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(PhaserError::ValidationError(format!(
                "Missing required event fields: {:?}",
                missing
            )));
        }

        let mut data =
            self.read_json(&self.events_file(), || json!({"version": 1, "events": []}))?;
        data["events"].as_array_mut().unwrap().push(event);
        self.write_json(&self.events_file(), &data)
    }

    pub fn get_events(
        &self,
        audit_id: Option<&str>,
        event_type: Option<&str>,
        since: Option<&str>,
    ) -> Result<Vec<Value>, PhaserError> {
        let data =
            self.read_json(&self.events_file(), || json!({"version": 1, "events": []}))?;
        let mut events: Vec<Value> = data["events"].as_array().cloned().unwrap_or_default();

        if let Some(id) = audit_id {
            events.retain(|e| e.get("audit_id").and_then(Value::as_str) == Some(id));
        }
        if let Some(ty) = event_type {
            events.retain(|e| e.get("type").and_then(Value::as_str) == Some(ty));
        }
        if let Some(since) = since {
            events.retain(|e| e.get("timestamp").and_then(Value::as_str).unwrap_or("") >= since);
        }

        events.sort_by(|a, b| {
            let ta = a.get("timestamp").and_then(Value::as_str).unwrap_or("");
            let tb = b.get("timestamp").and_then(Value::as_str).unwrap_or("");
            ta.cmp(tb)
        });

        Ok(events)
    }

    pub fn clear_events(&self, before: Option<&str>) -> Result<usize, PhaserError> {
        let data =
            self.read_json(&self.events_file(), || json!({"version": 1, "events": []}))?;
        let mut data = data;
        let events = data["events"].as_array().cloned().unwrap_or_default();
        let original_count = events.len();

        let kept: Vec<Value> = match before {
            Some(cutoff) => events
                .into_iter()
                .filter(|e| e.get("timestamp").and_then(Value::as_str).unwrap_or("") >= cutoff)
                .collect(),
            None => Vec::new(),
        };

        let removed = original_count - kept.len();
        data["events"] = json!(kept);

        if removed > 0 {
            self.write_json(&self.events_file(), &data)?;
        }
        Ok(removed)
    }

    // -- Config operations ------------------------------------------------

    pub fn get_config(&self) -> Result<Value, PhaserError> {
        let path = self.config_file();
        if !path.exists() {
            return Ok(default_config());
        }
        let raw = self.read_locked_string(&path)?;
        let user_config: Value = serde_yaml::from_str(&raw).unwrap_or(json!({}));
        Ok(merge_config(&default_config(), &user_config))
    }

    pub fn set_config(&self, key: &str, value: Value) -> Result<(), PhaserError> {
        self.ensure_directories()?;
        let mut config = self.get_config()?;

        let keys: Vec<&str> = key.split('.').collect();
        let mut target = &mut config;
        for k in &keys[..keys.len() - 1] {
            if target.get(*k).is_none() {
                target[*k] = json!({});
            }
            target = target.get_mut(*k).unwrap();
        }
        target[keys[keys.len() - 1]] = value;

        self.write_yaml(&self.config_file(), &config)
    }

    pub fn reset_config(&self) -> Result<(), PhaserError> {
        self.ensure_directories()?;
        self.write_yaml(&self.config_file(), &default_config())
    }

    // -- Private helpers ----------------------------------------------------

    fn read_json(&self, path: &Path, default: impl Fn() -> Value) -> Result<Value, PhaserError> {
        if !path.exists() {
            return Ok(default());
        }
        let raw = self.read_locked_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn read_locked_string(&self, path: &Path) -> Result<String, PhaserError> {
        let file = std::fs::File::open(path)?;
        file.lock_shared()
            .map_err(|e| PhaserError::LockError(e.to_string()))?;
        let result = std::fs::read_to_string(path);
        FileExt::unlock(&file).ok();
        Ok(result?)
    }

    fn write_json(&self, path: &Path, data: &Value) -> Result<(), PhaserError> {
        let content = serde_json::to_string_pretty(data)?;
        self.atomic_write(path, &content)
    }

    fn write_yaml(&self, path: &Path, data: &Value) -> Result<(), PhaserError> {
        let content = serde_yaml::to_string(data)?;
        self.atomic_write(path, &content)
    }

    /// Write atomically via temp-file + fsync + rename, retrying the
    /// exclusive lock acquisition with a short backoff on contention.
    fn atomic_write(&self, path: &Path, content: &str) -> Result<(), PhaserError> {
        let tmp_path = match path.extension() {
            Some(ext) => path.with_extension(format!("{}.tmp", ext.to_string_lossy())),
            None => path.with_extension("tmp"),
        };

        let result = (|| -> Result<(), PhaserError> {
            for (attempt, delay_ms) in RETRY_DELAYS_MS.iter().enumerate() {
                let file = std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&tmp_path)?;

                match file.try_lock_exclusive() {
                    Ok(()) => {
                        use std::io::Write;
                        let mut f = &file;
                        f.write_all(content.as_bytes())?;
                        f.flush()?;
                        file.sync_all()?;
                        FileExt::unlock(&file).ok();
                        std::fs::rename(&tmp_path, path)?;
                        return Ok(());
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        if attempt == MAX_RETRIES - 1 {
                            return Err(PhaserError::LockError(
                                "could not acquire exclusive lock after retries".into(),
                            ));
                        }
                        thread::sleep(Duration::from_millis(*delay_ms));
                    }
                    Err(e) => return Err(PhaserError::IoError(e)),
                }
            }
            unreachable!()
        })();

        if result.is_err() && tmp_path.exists() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }
}

/// Deep merge `override_` on top of `default`, recursing into nested objects.
fn merge_config(default: &Value, override_: &Value) -> Value {
    let mut result = default.clone();
    if let (Some(result_obj), Some(override_obj)) =
        (result.as_object_mut(), override_.as_object())
    {
        for (key, value) in override_obj {
            match result_obj.get(key) {
                Some(existing) if existing.is_object() && value.is_object() => {
                    result_obj.insert(key.clone(), merge_config(existing, value));
                }
                _ => {
                    result_obj.insert(key.clone(), value.clone());
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_at(dir: &Path) -> Store {
        Store::new(Some(dir.to_path_buf()))
    }

    #[test]
    fn save_and_get_audit_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let id = store
            .save_audit(json!({
                "project": "phaser",
                "slug": "p1",
                "date": "2026-07-26",
                "status": "in_progress",
            }))
            .unwrap();
        let fetched = store.get_audit(&id).unwrap().unwrap();
        assert_eq!(fetched["project"], "phaser");
    }

    #[test]
    fn save_audit_rejects_missing_fields() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let err = store.save_audit(json!({"project": "phaser"})).unwrap_err();
        assert!(matches!(err, PhaserError::ValidationError(_)));
    }

    #[test]
    fn append_and_filter_events() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store
            .append_event(json!({
                "id": "e1", "type": "phase_started", "timestamp": "2026-07-26T00:00:00.000Z", "audit_id": "a1"
            }))
            .unwrap();
        store
            .append_event(json!({
                "id": "e2", "type": "phase_completed", "timestamp": "2026-07-26T00:01:00.000Z", "audit_id": "a2"
            }))
            .unwrap();

        let filtered = store.get_events(Some("a1"), None, None).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0]["id"], "e1");
    }

    #[test]
    fn clear_events_before_cutoff() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store
            .append_event(json!({"id": "e1", "type": "x", "timestamp": "2026-01-01T00:00:00.000Z", "audit_id": "a"}))
            .unwrap();
        store
            .append_event(json!({"id": "e2", "type": "x", "timestamp": "2026-06-01T00:00:00.000Z", "audit_id": "a"}))
            .unwrap();

        let removed = store.clear_events(Some("2026-03-01T00:00:00.000Z")).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_events(None, None, None).unwrap().len(), 1);
    }

    #[test]
    fn config_defaults_when_absent() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        let config = store.get_config().unwrap();
        assert_eq!(config["storage"]["max_events"], 10000);
    }

    #[test]
    fn config_set_dot_path_and_merge() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store.set_config("storage.max_events", json!(500)).unwrap();
        let config = store.get_config().unwrap();
        assert_eq!(config["storage"]["max_events"], 500);
        assert_eq!(config["storage"]["retention_days"], 90);
    }

    #[test]
    fn config_reset_restores_defaults() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store.set_config("display.verbose", json!(true)).unwrap();
        store.reset_config().unwrap();
        let config = store.get_config().unwrap();
        assert_eq!(config["display"]["verbose"], false);
    }

    #[test]
    fn env_override_wins_root_resolution() {
        let dir = tempdir().unwrap();
        std::env::set_var(STORAGE_DIR_ENV, dir.path());
        let root = find_phaser_root();
        std::env::remove_var(STORAGE_DIR_ENV);
        assert_eq!(root, dir.path());
    }
}
