use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

/// Process-wide service metrics tracker.
///
/// Counters are atomics; keyed counters (per event kind, per failure code,
/// per method) live behind an `RwLock<HashMap>`. Reads take a snapshot so
/// callers never hold a lock across await points.
#[derive(Clone)]
pub struct ServiceMetrics {
    inner: Arc<ServiceMetricsInner>,
}

struct ServiceMetricsInner {
    /// Events successfully processed, keyed by event kind ("volume", "container").
    events_processed: RwLock<HashMap<String, u64>>,

    /// Events dropped because the bounded queue was full.
    events_dropped: AtomicU64,

    /// Event pipeline errors, keyed by stage ("processing", "timeout").
    event_errors: RwLock<HashMap<String, u64>>,

    /// Event stream reconnect attempts after a disconnect.
    reconnects: AtomicU64,

    /// Completed reconciliation passes, keyed by entity ("volumes", "containers").
    reconcile_runs: RwLock<HashMap<String, u64>>,

    /// Per-item reconciliation failures that were skipped.
    reconcile_item_errors: AtomicU64,

    /// Scans started (cache misses that reached the engine pipeline).
    scan_attempts: AtomicU64,

    /// Scan failures, keyed by machine error code.
    scan_failures: RwLock<HashMap<String, u64>>,

    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    /// Scan duration stats, keyed by method name.
    scan_durations: RwLock<HashMap<String, DurationStats>>,

    /// Worker panics caught at the task boundary.
    worker_panics: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DurationStats {
    pub count: u64,
    pub total_nanos: u64,
    pub max_nanos: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub events_processed: HashMap<String, u64>,
    pub events_dropped: u64,
    pub event_errors: HashMap<String, u64>,
    pub reconnects: u64,
    pub reconcile_runs: HashMap<String, u64>,
    pub reconcile_item_errors: u64,
    pub scan_attempts: u64,
    pub scan_failures: HashMap<String, u64>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub scan_durations: HashMap<String, DurationStats>,
    pub worker_panics: u64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServiceMetricsInner {
                events_processed: RwLock::new(HashMap::new()),
                events_dropped: AtomicU64::new(0),
                event_errors: RwLock::new(HashMap::new()),
                reconnects: AtomicU64::new(0),
                reconcile_runs: RwLock::new(HashMap::new()),
                reconcile_item_errors: AtomicU64::new(0),
                scan_attempts: AtomicU64::new(0),
                scan_failures: RwLock::new(HashMap::new()),
                cache_hits: AtomicU64::new(0),
                cache_misses: AtomicU64::new(0),
                scan_durations: RwLock::new(HashMap::new()),
                worker_panics: AtomicU64::new(0),
            }),
        }
    }

    pub fn event_processed(&self, kind: &str) {
        let mut map = self.inner.events_processed.write();
        *map.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn event_dropped(&self) {
        self.inner.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_error(&self, stage: &str) {
        let mut map = self.inner.event_errors.write();
        *map.entry(stage.to_string()).or_insert(0) += 1;
    }

    pub fn reconnect(&self) {
        self.inner.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconcile_run(&self, entity: &str) {
        let mut map = self.inner.reconcile_runs.write();
        *map.entry(entity.to_string()).or_insert(0) += 1;
    }

    pub fn reconcile_item_error(&self) {
        self.inner.reconcile_item_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scan_attempt(&self) {
        self.inner.scan_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scan_failure(&self, code: &str) {
        let mut map = self.inner.scan_failures.write();
        *map.entry(code.to_string()).or_insert(0) += 1;
    }

    pub fn cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scan_duration(&self, method: &str, duration: Duration) {
        let nanos = duration.as_nanos().min(u64::MAX as u128) as u64;
        let mut map = self.inner.scan_durations.write();
        let stats = map.entry(method.to_string()).or_default();
        stats.count += 1;
        stats.total_nanos = stats.total_nanos.saturating_add(nanos);
        stats.max_nanos = stats.max_nanos.max(nanos);
    }

    pub fn worker_panic(&self) {
        self.inner.worker_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_dropped(&self) -> u64 {
        self.inner.events_dropped.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.inner.reconnects.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.inner.cache_hits.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_processed: self.inner.events_processed.read().clone(),
            events_dropped: self.inner.events_dropped.load(Ordering::Relaxed),
            event_errors: self.inner.event_errors.read().clone(),
            reconnects: self.inner.reconnects.load(Ordering::Relaxed),
            reconcile_runs: self.inner.reconcile_runs.read().clone(),
            reconcile_item_errors: self.inner.reconcile_item_errors.load(Ordering::Relaxed),
            scan_attempts: self.inner.scan_attempts.load(Ordering::Relaxed),
            scan_failures: self.inner.scan_failures.read().clone(),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.inner.cache_misses.load(Ordering::Relaxed),
            scan_durations: self.inner.scan_durations.read().clone(),
            worker_panics: self.inner.worker_panics.load(Ordering::Relaxed),
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
