//! Session counters
//!
//! Lock-free counters updated by the session as it dispatches deliveries,
//! plus a bounded latency window for the apply path. Readers take a
//! `MetricsSnapshot` or an exported name → value map.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Apply latencies kept for percentiles.
const APPLY_WINDOW: usize = 1024;

/// Counters for one subscription session.
pub struct SessionMetrics {
    pub events_applied: AtomicU64,
    pub events_dropped: AtomicU64,
    /// Deliveries discarded because their handle was superseded.
    pub events_fenced: AtomicU64,
    /// Deliveries with an unrecognised command.
    pub events_unknown: AtomicU64,
    pub snapshots_completed: AtomicU64,
    pub restarts: AtomicU64,
    pub subscribe_calls: AtomicU64,
    pub subscribe_failures: AtomicU64,
    pub apply_latency_ns: Mutex<LatencyWindow>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_applied: u64,
    pub events_dropped: u64,
    pub events_fenced: u64,
    pub events_unknown: u64,
    pub snapshots_completed: u64,
    pub restarts: u64,
    pub subscribe_calls: u64,
    pub subscribe_failures: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            events_applied: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            events_fenced: AtomicU64::new(0),
            events_unknown: AtomicU64::new(0),
            snapshots_completed: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            subscribe_calls: AtomicU64::new(0),
            subscribe_failures: AtomicU64::new(0),
            apply_latency_ns: Mutex::new(LatencyWindow::new(APPLY_WINDOW)),
        }
    }

    pub fn record_applied(&self, latency_ns: u64) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.apply_latency_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    pub fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fenced(&self) {
        self.events_fenced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown(&self) {
        self.events_unknown.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_completed(&self) {
        self.snapshots_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a subscribe attempt and whether the transport accepted it.
    pub fn record_subscribe(&self, accepted: bool) {
        self.subscribe_calls.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.subscribe_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_applied: self.events_applied.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_fenced: self.events_fenced.load(Ordering::Relaxed),
            events_unknown: self.events_unknown.load(Ordering::Relaxed),
            snapshots_completed: self.snapshots_completed.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            subscribe_calls: self.subscribe_calls.load(Ordering::Relaxed),
            subscribe_failures: self.subscribe_failures.load(Ordering::Relaxed),
        }
    }

    /// Percentile (0-100) of the recent apply latencies, if any.
    pub fn apply_latency_ns(&self, p: usize) -> Option<u64> {
        self.apply_latency_ns
            .lock()
            .ok()
            .and_then(|window| window.percentile(p))
    }

    /// Export counters as a name → value map. Apply latency percentiles are
    /// included once at least one event has been applied.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let s = self.snapshot();
        let mut m = BTreeMap::new();
        m.insert("events_applied".to_string(), s.events_applied);
        m.insert("events_dropped".to_string(), s.events_dropped);
        m.insert("events_fenced".to_string(), s.events_fenced);
        m.insert("events_unknown".to_string(), s.events_unknown);
        m.insert("snapshots_completed".to_string(), s.snapshots_completed);
        m.insert("restarts".to_string(), s.restarts);
        m.insert("subscribe_calls".to_string(), s.subscribe_calls);
        m.insert("subscribe_failures".to_string(), s.subscribe_failures);
        if let Some(p50) = self.apply_latency_ns(50) {
            m.insert("apply_p50_ns".to_string(), p50);
        }
        if let Some(p99) = self.apply_latency_ns(99) {
            m.insert("apply_p99_ns".to_string(), p99);
        }
        m
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Ring of the most recent latency samples.
pub struct LatencyWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Add a sample, evicting the oldest when full.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Nearest-rank percentile (0-100) over the window.
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut scratch: Vec<u64> = self.samples.iter().copied().collect();
        let rank = (p.min(100) * (scratch.len() - 1) + 50) / 100;
        let (_, value, _) = scratch.select_nth_unstable(rank);
        Some(*value)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let metrics = SessionMetrics::new();
        metrics.record_applied(100);
        metrics.record_applied(200);
        metrics.record_dropped();
        metrics.record_fenced();
        metrics.record_subscribe(true);
        metrics.record_subscribe(false);

        let s = metrics.snapshot();
        assert_eq!(s.events_applied, 2);
        assert_eq!(s.events_dropped, 1);
        assert_eq!(s.events_fenced, 1);
        assert_eq!(s.subscribe_calls, 2);
        assert_eq!(s.subscribe_failures, 1);
        assert_eq!(s.restarts, 0);
    }

    #[test]
    fn test_export_names() {
        let metrics = SessionMetrics::new();
        metrics.record_unknown();
        metrics.record_snapshot_completed();
        metrics.record_restart();

        let exported = metrics.export();
        assert_eq!(exported["events_unknown"], 1);
        assert_eq!(exported["snapshots_completed"], 1);
        assert_eq!(exported["restarts"], 1);
        assert_eq!(exported.len(), 8);
    }

    #[test]
    fn test_export_includes_latency_once_applied() {
        let metrics = SessionMetrics::new();
        assert!(!metrics.export().contains_key("apply_p99_ns"));

        for ns in 1..=100 {
            metrics.record_applied(ns);
        }
        let exported = metrics.export();
        assert_eq!(exported["apply_p50_ns"], 51);
        assert_eq!(exported["apply_p99_ns"], 99);
        assert_eq!(exported.len(), 10);
    }

    #[test]
    fn test_window_percentiles() {
        let mut window = LatencyWindow::new(100);
        for v in (1..=100).rev() {
            window.record(v);
        }
        assert_eq!(window.percentile(0), Some(1));
        assert_eq!(window.percentile(100), Some(100));
        assert_eq!(window.percentile(250), Some(100));
        assert_eq!(LatencyWindow::new(4).percentile(50), None);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = LatencyWindow::new(3);
        for v in [10, 20, 30, 40] {
            window.record(v);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.percentile(0), Some(20));
        assert_eq!(window.percentile(100), Some(40));
    }
}
