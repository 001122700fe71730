//! The performance monitor: collects per-event records, flushes them to
//! per-minute cache lists, and aggregates a trailing window into a
//! `PerformanceMetrics` snapshot with fixed alert rules (spec §4.8).

mod engine;
mod model;
mod runner;

pub use engine::{MonitorConfig, MonitorEngine, MonitorError};
pub use model::{
    Alert, AlertRule, AlertThresholds, ApiMetrics, CacheMetrics, DbMetrics, EventKind, EventRecord,
    PerformanceMetrics, QueueMetrics, SystemMetrics,
};
pub use runner::spawn;
