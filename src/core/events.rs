//! Typed events, emission, subscription, and replay for audit activity.
//!
//! Events are persisted through a [`Store`](super::store::Store) and fanned
//! out to in-process subscribers; a subscriber that errors is logged and
//! skipped rather than aborting the rest of the dispatch.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::error::PhaserError;
use super::store::Store;
use super::time::{new_id, now_iso_millis};

/// The closed set of event kinds Phaser ever emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AuditStarted,
    AuditCompleted,
    AuditAbandoned,
    PhaseStarted,
    PhaseCompleted,
    PhaseFailed,
    PhaseSkipped,
    VerificationPassed,
    VerificationFailed,
    FileCreated,
    FileModified,
    FileDeleted,
}

/// An immutable audit event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: String,
    pub audit_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<u32>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Event {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("Event always serializes")
    }

    pub fn from_value(value: &Value) -> Result<Self, PhaserError> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// Emits and manages audit events: persists them via a `Store` and notifies
/// in-process subscribers.
pub struct EventEmitter {
    store: Option<Store>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventEmitter {
    /// An emitter backed by a store (events persist across runs).
    pub fn new(store: Store) -> Self {
        Self {
            store: Some(store),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// An emitter that only notifies subscribers, with no persistence.
    pub fn ephemeral() -> Self {
        Self {
            store: None,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn emit(
        &self,
        kind: EventKind,
        audit_id: &str,
        phase: Option<u32>,
        data: Map<String, Value>,
    ) -> Result<Event, PhaserError> {
        let event = Event {
            id: new_id(),
            kind,
            timestamp: now_iso_millis(),
            audit_id: audit_id.to_string(),
            phase,
            data,
        };

        if let Some(store) = &self.store {
            store.append_event(event.to_value())?;
        }

        self.notify_subscribers(&event);
        Ok(event)
    }

    pub fn subscribe(&self, callback: Subscriber) {
        self.subscribers.lock().unwrap().push(callback);
    }

    /// Replay historical events for an audit in chronological order.
    pub fn replay(
        &self,
        audit_id: &str,
        mut callback: impl FnMut(&Event),
    ) -> Result<usize, PhaserError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| PhaserError::ValidationError("cannot replay without a store".into()))?;

        let raw_events = store.get_events(Some(audit_id), None, None)?;
        for raw in &raw_events {
            let event = Event::from_value(raw)?;
            callback(&event);
        }
        Ok(raw_events.len())
    }

    fn notify_subscribers(&self, event: &Event) {
        let subscribers = self.subscribers.lock().unwrap();
        for callback in subscribers.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(event)));
            if result.is_err() {
                eprintln!("event subscriber panicked while handling {:?}", event.kind);
            }
        }
    }
}

// -- Convenience emitters, mirroring the emit_* helpers used by callers ----

pub fn emit_audit_started(
    emitter: &EventEmitter,
    audit_id: &str,
    project: &str,
    slug: &str,
    phases_total: u32,
) -> Result<Event, PhaserError> {
    let mut data = Map::new();
    data.insert("project".into(), json!(project));
    data.insert("slug".into(), json!(slug));
    data.insert("phases_total".into(), json!(phases_total));
    emitter.emit(EventKind::AuditStarted, audit_id, None, data)
}

pub fn emit_audit_completed(
    emitter: &EventEmitter,
    audit_id: &str,
    duration_seconds: f64,
    phases_completed: u32,
    phases_skipped: u32,
) -> Result<Event, PhaserError> {
    let mut data = Map::new();
    data.insert("duration_seconds".into(), json!(duration_seconds));
    data.insert("phases_completed".into(), json!(phases_completed));
    data.insert("phases_skipped".into(), json!(phases_skipped));
    emitter.emit(EventKind::AuditCompleted, audit_id, None, data)
}

pub fn emit_phase_started(
    emitter: &EventEmitter,
    audit_id: &str,
    phase: u32,
    description: &str,
) -> Result<Event, PhaserError> {
    let mut data = Map::new();
    data.insert("description".into(), json!(description));
    emitter.emit(EventKind::PhaseStarted, audit_id, Some(phase), data)
}

pub fn emit_phase_completed(
    emitter: &EventEmitter,
    audit_id: &str,
    phase: u32,
    duration_seconds: f64,
) -> Result<Event, PhaserError> {
    let mut data = Map::new();
    data.insert("duration_seconds".into(), json!(duration_seconds));
    emitter.emit(EventKind::PhaseCompleted, audit_id, Some(phase), data)
}

pub fn emit_phase_failed(
    emitter: &EventEmitter,
    audit_id: &str,
    phase: u32,
    error: &str,
    attempts: u32,
) -> Result<Event, PhaserError> {
    let mut data = Map::new();
    data.insert("error".into(), json!(error));
    data.insert("attempts".into(), json!(attempts));
    emitter.emit(EventKind::PhaseFailed, audit_id, Some(phase), data)
}

pub fn emit_phase_skipped(
    emitter: &EventEmitter,
    audit_id: &str,
    phase: u32,
    reason: &str,
) -> Result<Event, PhaserError> {
    let mut data = Map::new();
    data.insert("reason".into(), json!(reason));
    emitter.emit(EventKind::PhaseSkipped, audit_id, Some(phase), data)
}
