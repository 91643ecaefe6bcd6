//! Buffered WebRTC signals for the polling REST surface.
//!
//! At most one message per key: a newer post overwrites an unconsumed
//! prior one, and a read consumes. A slow poller can miss an overwritten
//! offer; this surface is the fallback path, not the primary transport.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// Buffered entries older than this are swept.
pub const SIGNAL_MAX_AGE_SECS: i64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct PendingSignal {
    pub payload: Value,
    pub stored_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SignalStore {
    signals: HashMap<String, PendingSignal>,
}

/// Key for a room-scoped signal of a given kind ("offer", "answer", "ice").
pub fn room_signal_key(room_id: &str, kind: &str) -> String {
    format!("{}_{}", room_id, kind)
}

impl SignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the payload, overwriting any unconsumed message of the same
    /// key.
    pub fn put(&mut self, key: &str, payload: Value, now: DateTime<Utc>) {
        self.signals.insert(
            key.to_string(),
            PendingSignal {
                payload,
                stored_at: now,
            },
        );
    }

    /// Returns and deletes the buffered message for `key`, if any.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        self.signals.remove(key).map(|s| s.payload)
    }

    /// Drops entries older than the max age; returns how many were swept.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.signals.len();
        let max_age = Duration::seconds(SIGNAL_MAX_AGE_SECS);
        self.signals.retain(|_, s| now - s.stored_at <= max_age);
        before - self.signals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn take_consumes() {
        let mut store = SignalStore::new();
        store.put("p1", json!({"type": "offer"}), Utc::now());
        assert_eq!(store.take("p1"), Some(json!({"type": "offer"})));
        assert_eq!(store.take("p1"), None);
    }

    #[test]
    fn newer_post_overwrites_unconsumed_message() {
        let mut store = SignalStore::new();
        let key = room_signal_key("r1", "offer");
        store.put(&key, json!({"sdp": "first"}), Utc::now());
        store.put(&key, json!({"sdp": "second"}), Utc::now());
        assert_eq!(store.take(&key), Some(json!({"sdp": "second"})));
    }

    #[test]
    fn sweep_drops_only_stale_entries() {
        let mut store = SignalStore::new();
        let now = Utc::now();
        store.put("stale", json!(1), now - Duration::seconds(SIGNAL_MAX_AGE_SECS + 1));
        store.put("live", json!(2), now);
        assert_eq!(store.sweep(now), 1);
        assert_eq!(store.take("stale"), None);
        assert_eq!(store.take("live"), Some(json!(2)));
    }
}
