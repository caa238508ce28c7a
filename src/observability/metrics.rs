//! Runtime metrics.
//!
//! Provides the counters and gauges the runtime updates on its hot paths,
//! plus a serializable point-in-time snapshot for reports.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub(crate) const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increments the counter by 1.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Adds a value to the counter.
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge that can go up and down.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub(crate) const fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    /// Sets the gauge value.
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Raises the gauge to `value` if it is higher than the current value.
    pub fn set_max(&self, value: i64) {
        self.value.fetch_max(value, Ordering::Relaxed);
    }

    /// Increments the gauge by 1.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Decrements the gauge by 1.
    pub fn decrement(&self) {
        self.sub(1);
    }

    /// Adds a value to the gauge.
    pub fn add(&self, value: i64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Subtracts a value from the gauge.
    pub fn sub(&self, value: i64) {
        self.value.fetch_sub(value, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// The fixed set of metrics a runtime instance maintains.
///
/// All updates are relaxed atomics; readers get values that are individually
/// accurate but not mutually consistent.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    /// Tasks accepted by any queue.
    pub tasks_submitted: Counter,
    /// Tasks whose body ran to completion.
    pub tasks_completed: Counter,
    /// Tasks whose body panicked.
    pub tasks_failed: Counter,
    /// Tasks cancelled before their body ran.
    pub tasks_cancelled: Counter,
    /// Blocking submissions that ran inline on the caller's thread.
    pub sync_inline_runs: Counter,
    /// Reentrant blocking submissions caught by the detector.
    pub reentrancy_detected: Counter,
    /// Barrier tasks executed on concurrent queues.
    pub barriers_executed: Counter,
    /// Gate permits granted.
    pub gate_acquires: Counter,
    /// Gate acquisitions that had to wait for a permit.
    pub gate_contended: Counter,
    /// Worker threads spawned over the runtime's lifetime.
    pub workers_spawned: Counter,
    /// Worker threads retired after idling.
    pub workers_retired: Counter,
    /// Worker threads currently alive.
    pub workers_active: Gauge,
    /// Worker threads currently running a task.
    pub workers_busy: Gauge,
    /// Gate permits currently held.
    pub gate_holders: Gauge,
    /// Highest number of gate permits held at once.
    pub gate_holders_peak: Gauge,
}

impl RuntimeMetrics {
    pub(crate) const fn new() -> Self {
        Self {
            tasks_submitted: Counter::new(),
            tasks_completed: Counter::new(),
            tasks_failed: Counter::new(),
            tasks_cancelled: Counter::new(),
            sync_inline_runs: Counter::new(),
            reentrancy_detected: Counter::new(),
            barriers_executed: Counter::new(),
            gate_acquires: Counter::new(),
            gate_contended: Counter::new(),
            workers_spawned: Counter::new(),
            workers_retired: Counter::new(),
            workers_active: Gauge::new(),
            workers_busy: Gauge::new(),
            gate_holders: Gauge::new(),
            gate_holders_peak: Gauge::new(),
        }
    }

    /// Captures a point-in-time snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.get(),
            tasks_completed: self.tasks_completed.get(),
            tasks_failed: self.tasks_failed.get(),
            tasks_cancelled: self.tasks_cancelled.get(),
            sync_inline_runs: self.sync_inline_runs.get(),
            reentrancy_detected: self.reentrancy_detected.get(),
            barriers_executed: self.barriers_executed.get(),
            gate_acquires: self.gate_acquires.get(),
            gate_contended: self.gate_contended.get(),
            workers_spawned: self.workers_spawned.get(),
            workers_retired: self.workers_retired.get(),
            workers_active: self.workers_active.get(),
            workers_busy: self.workers_busy.get(),
            gate_holders: self.gate_holders.get(),
            gate_holders_peak: self.gate_holders_peak.get(),
        }
    }
}

/// A point-in-time copy of [`RuntimeMetrics`], suitable for serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Tasks accepted by any queue.
    pub tasks_submitted: u64,
    /// Tasks whose body ran to completion.
    pub tasks_completed: u64,
    /// Tasks whose body panicked.
    pub tasks_failed: u64,
    /// Tasks cancelled before their body ran.
    pub tasks_cancelled: u64,
    /// Blocking submissions that ran inline on the caller's thread.
    pub sync_inline_runs: u64,
    /// Reentrant blocking submissions caught by the detector.
    pub reentrancy_detected: u64,
    /// Barrier tasks executed on concurrent queues.
    pub barriers_executed: u64,
    /// Gate permits granted.
    pub gate_acquires: u64,
    /// Gate acquisitions that had to wait for a permit.
    pub gate_contended: u64,
    /// Worker threads spawned over the runtime's lifetime.
    pub workers_spawned: u64,
    /// Worker threads retired after idling.
    pub workers_retired: u64,
    /// Worker threads currently alive.
    pub workers_active: i64,
    /// Worker threads currently running a task.
    pub workers_busy: i64,
    /// Gate permits currently held.
    pub gate_holders: i64,
    /// Highest number of gate permits held at once.
    pub gate_holders_peak: i64,
}

impl MetricsSnapshot {
    /// Renders the snapshot as pretty-printed JSON.
    ///
    /// # Panics
    ///
    /// Never panics: the snapshot is a flat struct of integers, which always
    /// serializes.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("snapshot serialization cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let c = Counter::new();
        c.increment();
        c.add(4);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn gauge_moves_both_ways() {
        let g = Gauge::new();
        g.increment();
        g.increment();
        g.decrement();
        assert_eq!(g.get(), 1);

        g.set(10);
        assert_eq!(g.get(), 10);
    }

    #[test]
    fn gauge_set_max_keeps_peak() {
        let g = Gauge::new();
        g.set_max(3);
        g.set_max(7);
        g.set_max(5);
        assert_eq!(g.get(), 7);
    }

    #[test]
    fn snapshot_reflects_updates() {
        let m = RuntimeMetrics::new();
        m.tasks_submitted.add(3);
        m.tasks_completed.add(2);
        m.workers_active.set(4);

        let snap = m.snapshot();
        assert_eq!(snap.tasks_submitted, 3);
        assert_eq!(snap.tasks_completed, 2);
        assert_eq!(snap.workers_active, 4);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let m = RuntimeMetrics::new();
        m.gate_acquires.add(9);
        let snap = m.snapshot();

        let json = snap.to_json();
        let parsed: MetricsSnapshot = serde_json::from_str(&json).expect("valid json");
        assert_eq!(parsed, snap);
    }
}
