use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::normalize_serial;

/// Raw metric strings exactly as the side-channel agent reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub cpu: Option<String>,
    pub gpu: Option<String>,
    pub ram: Option<String>,
    pub disk: Option<String>,
    pub network: Option<String>,
    pub battery: Option<String>,
}

/// Read-time view of a cached snapshot. `is_online` is derived from the
/// entry's age at the moment of the read; staleness is never stored.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView {
    pub serial: String,
    pub payload: TelemetryPayload,
    pub received_at: DateTime<Utc>,
    pub is_online: bool,
}

struct Entry {
    payload: TelemetryPayload,
    received_at: DateTime<Utc>,
}

/// Latest telemetry snapshot per device, keyed by upper-cased serial.
/// Process-local and bounded by fleet size: the only eviction is
/// overwrite-on-put, so a device that never reports again leaves one
/// permanently stale entry behind.
///
/// Fed by the unauthenticated push endpoint; see the trust-boundary note on
/// that route. Owned by the composition root and injected, so it can be
/// swapped for a shared store without touching call sites.
pub struct SnapshotCache {
    stale_after: chrono::Duration,
    inner: Mutex<HashMap<String, Entry>>,
}

impl SnapshotCache {
    pub fn new(stale_after: chrono::Duration) -> Self {
        Self {
            stale_after,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Unconditional overwrite; the latest snapshot is the only one kept.
    pub fn put(&self, serial: &str, payload: TelemetryPayload) {
        self.put_at(serial, payload, Utc::now());
    }

    pub fn put_at(&self, serial: &str, payload: TelemetryPayload, now: DateTime<Utc>) {
        let key = normalize_serial(serial);
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(
            key,
            Entry {
                payload,
                received_at: now,
            },
        );
    }

    /// A stale snapshot is still returned; callers decide policy.
    pub fn get(&self, serial: &str) -> Option<SnapshotView> {
        self.get_at(serial, Utc::now())
    }

    pub fn get_at(&self, serial: &str, now: DateTime<Utc>) -> Option<SnapshotView> {
        let key = normalize_serial(serial);
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(&key).map(|e| self.view(&key, e, now))
    }

    /// Every cached entry, most recent first, each annotated with its
    /// derived online flag.
    pub fn list_active(&self) -> Vec<SnapshotView> {
        self.list_active_at(Utc::now())
    }

    pub fn list_active_at(&self, now: DateTime<Utc>) -> Vec<SnapshotView> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut views: Vec<SnapshotView> = map.iter().map(|(k, e)| self.view(k, e, now)).collect();
        views.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        views
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn view(&self, serial: &str, entry: &Entry, now: DateTime<Utc>) -> SnapshotView {
        SnapshotView {
            serial: serial.to_string(),
            payload: entry.payload.clone(),
            received_at: entry.received_at,
            is_online: now - entry.received_at <= self.stale_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> SnapshotCache {
        SnapshotCache::new(chrono::Duration::seconds(60))
    }

    fn payload(cpu: &str) -> TelemetryPayload {
        TelemetryPayload {
            cpu: Some(cpu.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn put_then_get_returns_exact_payload_fresh() {
        let c = cache();
        let now = Utc::now();
        c.put_at("ABC1234", payload("37%"), now);

        let view = c.get_at("ABC1234", now).unwrap();
        assert_eq!(view.payload, payload("37%"));
        assert_eq!(view.received_at, now);
        assert!(view.is_online);
    }

    #[test]
    fn serial_matching_is_case_insensitive() {
        let c = cache();
        c.put("abc1234", payload("1%"));
        assert!(c.get("ABC1234").is_some());
        assert!(c.get(" abc1234 ").is_some());
    }

    #[test]
    fn stale_entry_still_returned_but_offline() {
        let c = cache();
        let now = Utc::now();
        c.put_at("ABC1234", payload("37%"), now);

        let later = now + chrono::Duration::seconds(61);
        let view = c.get_at("ABC1234", later).unwrap();
        assert_eq!(view.payload, payload("37%"));
        assert!(!view.is_online);

        // Exactly at the window boundary the entry still counts as online.
        let edge = now + chrono::Duration::seconds(60);
        assert!(c.get_at("ABC1234", edge).unwrap().is_online);
    }

    #[test]
    fn latest_put_overwrites_previous() {
        let c = cache();
        let now = Utc::now();
        c.put_at("ABC1234", payload("10%"), now);
        c.put_at("ABC1234", payload("90%"), now + chrono::Duration::seconds(1));

        assert_eq!(c.len(), 1);
        let view = c.get_at("ABC1234", now + chrono::Duration::seconds(2)).unwrap();
        assert_eq!(view.payload, payload("90%"));
    }

    #[test]
    fn list_active_is_most_recent_first_with_derived_flags() {
        let c = cache();
        let now = Utc::now();
        c.put_at("OLD", payload("old"), now - chrono::Duration::seconds(120));
        c.put_at("NEW", payload("new"), now);

        let views = c.list_active_at(now);
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].serial, "NEW");
        assert!(views[0].is_online);
        assert_eq!(views[1].serial, "OLD");
        assert!(!views[1].is_online);
    }

    #[test]
    fn unknown_serial_is_none() {
        assert!(cache().get("NOPE").is_none());
    }
}
