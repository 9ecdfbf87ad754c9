//! Time and identity helpers shared across Phaser's subsystems.

use chrono::Utc;
use uuid::Uuid;

/// Current UTC time as ISO-8601 with millisecond precision, e.g.
/// `2026-07-26T14:03:11.482Z`.
pub fn now_iso_millis() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// A fresh random identity for an audit, event, or branch context.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
