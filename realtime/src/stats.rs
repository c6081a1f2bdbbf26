use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by the manager, dispatcher and writers. Relaxed atomics: the
/// numbers are for operators, not for synchronization.
#[derive(Debug)]
pub struct ManagerStats {
    total_connections: AtomicU64,
    events_published: AtomicU64,
    events_shed: AtomicU64,
    deliveries: AtomicU64,
    frames_dropped: AtomicU64,
    evictions: AtomicU64,
    start_time: DateTime<Utc>,
    last_event_time: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of the counters, served by the stats endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub active_connections: usize,
    pub events_published: u64,
    pub events_shed: u64,
    pub deliveries: u64,
    pub frames_dropped: u64,
    pub evictions: u64,
    pub start_time: DateTime<Utc>,
    pub last_event_time: Option<DateTime<Utc>>,
    pub uptime_secs: i64,
}

impl ManagerStats {
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            events_shed: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            start_time: Utc::now(),
            last_event_time: Mutex::new(None),
        }
    }

    pub fn record_connection(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        *self.last_event_time.lock() = Some(Utc::now());
    }

    pub fn record_shed(&self) {
        self.events_shed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deliveries(&self, count: u64) {
        self.deliveries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_shed(&self) -> u64 {
        self.events_shed.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, active_connections: usize) -> StatsSnapshot {
        let now = Utc::now();
        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections,
            events_published: self.events_published.load(Ordering::Relaxed),
            events_shed: self.events_shed.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            start_time: self.start_time,
            last_event_time: *self.last_event_time.lock(),
            uptime_secs: (now - self.start_time).num_seconds(),
        }
    }
}

impl Default for ManagerStats {
    fn default() -> Self {
        Self::new()
    }
}
