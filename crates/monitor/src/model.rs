//! Event records, aggregated snapshots, and alert types for the
//! performance monitor (spec §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Slow-query threshold used when aggregating DB metrics.
pub const SLOW_QUERY_THRESHOLD_MS: u64 = 500;

/// Default alert thresholds, overridable via [`AlertThresholds`].
pub const ALERT_P95_LATENCY_MS: u64 = 1000;
pub const ALERT_ERROR_RATE: f64 = 0.05;
pub const ALERT_CACHE_HIT_RATE: f64 = 0.80;
pub const ALERT_QUEUE_BACKLOG: u64 = 1000;

/// The four alert thresholds, configurable at startup (spec §6
/// `FlagDefaults`/`MonitorConfig` env vars).
#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    pub p95_latency_ms: u64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub queue_backlog: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            p95_latency_ms: ALERT_P95_LATENCY_MS,
            error_rate: ALERT_ERROR_RATE,
            cache_hit_rate: ALERT_CACHE_HIT_RATE,
            queue_backlog: ALERT_QUEUE_BACKLOG,
        }
    }
}

/// The event categories the monitor collects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ApiRequest,
    CacheOperation,
    DbQuery,
    QueueOperation,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::ApiRequest,
        EventKind::CacheOperation,
        EventKind::DbQuery,
        EventKind::QueueOperation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ApiRequest => "api_request",
            EventKind::CacheOperation => "cache_operation",
            EventKind::DbQuery => "db_query",
            EventKind::QueueOperation => "queue_operation",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single observed event, pushed onto the in-memory ring by callers
/// (router, validator, cache client, queue) as work completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub kind: EventKind,
    pub recorded_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    /// Only meaningful for `CacheOperation` events.
    pub cache_hit: Option<bool>,
    /// Only meaningful for `QueueOperation` events: the buffer depth
    /// observed at the time of the event.
    pub queue_depth: Option<u64>,
}

impl EventRecord {
    pub fn api_request(duration_ms: u64, success: bool) -> Self {
        Self {
            kind: EventKind::ApiRequest,
            recorded_at: Utc::now(),
            duration_ms,
            success,
            cache_hit: None,
            queue_depth: None,
        }
    }

    pub fn cache_operation(duration_ms: u64, hit: bool) -> Self {
        Self {
            kind: EventKind::CacheOperation,
            recorded_at: Utc::now(),
            duration_ms,
            success: true,
            cache_hit: Some(hit),
            queue_depth: None,
        }
    }

    pub fn db_query(duration_ms: u64, success: bool) -> Self {
        Self {
            kind: EventKind::DbQuery,
            recorded_at: Utc::now(),
            duration_ms,
            success,
            cache_hit: None,
            queue_depth: None,
        }
    }

    pub fn queue_operation(duration_ms: u64, queue_depth: u64) -> Self {
        Self {
            kind: EventKind::QueueOperation,
            recorded_at: Utc::now(),
            duration_ms,
            success: true,
            cache_hit: None,
            queue_depth: Some(queue_depth),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiMetrics {
    pub total: u64,
    pub avg_response_time_ms: f64,
    pub p50_response_time_ms: u64,
    pub p95_response_time_ms: u64,
    pub p99_response_time_ms: u64,
    pub error_rate: f64,
    pub throughput_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheMetrics {
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub avg_lookup_time_ms: f64,
    pub key_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DbMetrics {
    pub avg_query_time_ms: f64,
    pub queries_per_request: f64,
    pub slow_query_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueMetrics {
    pub buffer_size: u64,
    pub processing_rate_per_sec: f64,
    pub backlog: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemMetrics {
    pub memory_fraction: f64,
}

/// An aggregated snapshot over the trailing window (default 5 minutes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub api: ApiMetrics,
    pub cache: CacheMetrics,
    pub db: DbMetrics,
    pub queue: QueueMetrics,
    pub system: SystemMetrics,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertRule {
    HighP95Latency,
    HighErrorRate,
    LowCacheHitRate,
    QueueBacklog,
}

impl AlertRule {
    pub fn message(&self, value: f64, thresholds: &AlertThresholds) -> String {
        match self {
            AlertRule::HighP95Latency => {
                format!("p95 response time {value:.0}ms exceeds {}ms", thresholds.p95_latency_ms)
            }
            AlertRule::HighErrorRate => {
                format!("error rate {:.1}% exceeds {:.1}%", value * 100.0, thresholds.error_rate * 100.0)
            }
            AlertRule::LowCacheHitRate => {
                format!("cache hit rate {:.1}% below {:.1}%", value * 100.0, thresholds.cache_hit_rate * 100.0)
            }
            AlertRule::QueueBacklog => format!("queue backlog {value:.0} exceeds {}", thresholds.queue_backlog),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub rule: AlertRule,
    pub message: String,
    pub value: f64,
    pub fired_at: DateTime<Utc>,
}

/// Evaluate the four fixed alert rules against a snapshot.
pub fn evaluate_alerts(metrics: &PerformanceMetrics, thresholds: &AlertThresholds) -> Vec<Alert> {
    let now = Utc::now();
    let mut alerts = Vec::new();

    if metrics.api.p95_response_time_ms > thresholds.p95_latency_ms {
        let value = metrics.api.p95_response_time_ms as f64;
        alerts.push(Alert { rule: AlertRule::HighP95Latency, message: AlertRule::HighP95Latency.message(value, thresholds), value, fired_at: now });
    }
    if metrics.api.error_rate > thresholds.error_rate {
        let value = metrics.api.error_rate;
        alerts.push(Alert { rule: AlertRule::HighErrorRate, message: AlertRule::HighErrorRate.message(value, thresholds), value, fired_at: now });
    }
    if metrics.cache.hit_rate < thresholds.cache_hit_rate && metrics.cache.key_count > 0 {
        let value = metrics.cache.hit_rate;
        alerts.push(Alert { rule: AlertRule::LowCacheHitRate, message: AlertRule::LowCacheHitRate.message(value, thresholds), value, fired_at: now });
    }
    if metrics.queue.backlog > thresholds.queue_backlog {
        let value = metrics.queue.backlog as f64;
        alerts.push(Alert { rule: AlertRule::QueueBacklog, message: AlertRule::QueueBacklog.message(value, thresholds), value, fired_at: now });
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_metrics() -> PerformanceMetrics {
        PerformanceMetrics {
            window_start: Utc::now(),
            window_end: Utc::now(),
            api: ApiMetrics { p95_response_time_ms: 200, error_rate: 0.01, ..Default::default() },
            cache: CacheMetrics { hit_rate: 0.95, key_count: 10, ..Default::default() },
            db: DbMetrics::default(),
            queue: QueueMetrics { backlog: 5, ..Default::default() },
            system: SystemMetrics::default(),
        }
    }

    #[test]
    fn healthy_snapshot_fires_no_alerts() {
        assert!(evaluate_alerts(&healthy_metrics(), &AlertThresholds::default()).is_empty());
    }

    #[test]
    fn high_latency_fires_alert() {
        let mut m = healthy_metrics();
        m.api.p95_response_time_ms = 1500;
        let alerts = evaluate_alerts(&m, &AlertThresholds::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, AlertRule::HighP95Latency);
    }

    #[test]
    fn all_four_rules_can_fire_together() {
        let mut m = healthy_metrics();
        m.api.p95_response_time_ms = 2000;
        m.api.error_rate = 0.2;
        m.cache.hit_rate = 0.1;
        m.queue.backlog = 5000;
        assert_eq!(evaluate_alerts(&m, &AlertThresholds::default()).len(), 4);
    }

    #[test]
    fn empty_cache_does_not_fire_hit_rate_alert() {
        let mut m = healthy_metrics();
        m.cache.key_count = 0;
        m.cache.hit_rate = 0.0;
        assert!(evaluate_alerts(&m, &AlertThresholds::default()).iter().all(|a| a.rule != AlertRule::LowCacheHitRate));
    }

    #[test]
    fn event_kind_round_trips_through_str() {
        for kind in EventKind::ALL {
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }
}
