//! Observability for the runtime: metrics counters and snapshots.

pub mod metrics;

pub use metrics::{Counter, Gauge, MetricsSnapshot, RuntimeMetrics};
