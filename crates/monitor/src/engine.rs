//! The monitor engine: an in-memory event ring, periodic flush to
//! per-minute cache lists, and periodic aggregation into a
//! `PerformanceMetrics` snapshot with alert evaluation (spec §4.8).

use crate::model::{
    evaluate_alerts, Alert, AlertThresholds, ApiMetrics, CacheMetrics, DbMetrics, EventKind,
    EventRecord, PerformanceMetrics, QueueMetrics, SystemMetrics, SLOW_QUERY_THRESHOLD_MS,
};
use aicarpool_cache::{CacheClient, KeySpace};
use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;
use sysinfo::System;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("cache error: {0}")]
    Cache(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub flush_interval_secs: u64,
    pub aggregation_interval_secs: u64,
    pub window_minutes: i64,
    pub max_ring_events: usize,
    pub max_alerts: usize,
    pub per_bucket_cap: isize,
    pub bucket_ttl_secs: i64,
    pub thresholds: AlertThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 30,
            aggregation_interval_secs: 60,
            window_minutes: 5,
            max_ring_events: 20_000,
            max_alerts: 100,
            per_bucket_cap: 2_000,
            bucket_ttl_secs: 600,
            thresholds: AlertThresholds::default(),
        }
    }
}

fn minute_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M").to_string()
}

fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

pub struct MonitorEngine {
    cache: CacheClient,
    keys: KeySpace,
    config: MonitorConfig,
    ring: RwLock<Vec<EventRecord>>,
    alerts: RwLock<Vec<Alert>>,
    last_snapshot: RwLock<Option<PerformanceMetrics>>,
    sys: RwLock<System>,
}

impl MonitorEngine {
    pub fn new(cache: CacheClient, key_prefix: &str, config: MonitorConfig) -> Self {
        Self {
            cache,
            keys: KeySpace::new(key_prefix),
            config,
            ring: RwLock::new(Vec::new()),
            alerts: RwLock::new(Vec::new()),
            last_snapshot: RwLock::new(None),
            sys: RwLock::new(System::new()),
        }
    }

    /// Record an event onto the in-memory ring. Never errors: monitoring
    /// must not affect the calling request's success path.
    pub fn record(&self, event: EventRecord) {
        let mut ring = self.ring.write().unwrap();
        if ring.len() >= self.config.max_ring_events {
            let drop_count = self.config.max_ring_events / 10;
            ring.drain(0..drop_count.min(ring.len()));
        }
        ring.push(event);
    }

    fn take_ring(&self) -> Vec<EventRecord> {
        std::mem::take(&mut *self.ring.write().unwrap())
    }

    /// Drain the ring and push each event onto its per-minute,
    /// per-event-type cache list.
    pub async fn flush(&self) -> Result<usize> {
        let events = self.take_ring();
        if events.is_empty() {
            return Ok(0);
        }

        let mut buckets: std::collections::HashSet<(EventKind, String)> = std::collections::HashSet::new();
        for event in &events {
            let bucket = minute_bucket(event.recorded_at);
            let list_key = self.keys.performance_events(&format!("{}:{bucket}", event.kind.as_str()));
            self.cache
                .lpush_json(&list_key, event)
                .await
                .map_err(|e| MonitorError::Cache(e.to_string()))?;
            buckets.insert((event.kind, bucket));
        }

        for (kind, bucket) in buckets {
            let list_key = self.keys.performance_events(&format!("{}:{bucket}", kind.as_str()));
            self.cache
                .ltrim(&list_key, 0, self.config.per_bucket_cap.saturating_sub(1))
                .await
                .map_err(|e| MonitorError::Cache(e.to_string()))?;
            self.cache
                .expire(&list_key, self.config.bucket_ttl_secs)
                .await
                .map_err(|e| MonitorError::Cache(e.to_string()))?;
        }

        Ok(events.len())
    }

    async fn events_for_kind(&self, kind: EventKind, now: DateTime<Utc>) -> Result<Vec<EventRecord>> {
        let mut out = Vec::new();
        for offset in 0..self.config.window_minutes {
            let at = now - Duration::minutes(offset);
            let bucket = minute_bucket(at);
            let list_key = self.keys.performance_events(&format!("{}:{bucket}", kind.as_str()));
            let mut batch = self
                .cache
                .lrange_json::<EventRecord>(&list_key, 0, -1)
                .await
                .map_err(|e| MonitorError::Cache(e.to_string()))?;
            out.append(&mut batch);
        }
        Ok(out)
    }

    fn memory_fraction(&self) -> f64 {
        let mut sys = self.sys.write().unwrap();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return 0.0;
        }
        sys.used_memory() as f64 / total as f64
    }

    /// Aggregate the trailing `window_minutes` of flushed events into a
    /// snapshot, evaluate alerts, and record both.
    pub async fn aggregate(&self) -> Result<PerformanceMetrics> {
        let now = Utc::now();
        let window_start = now - Duration::minutes(self.config.window_minutes);
        let window_secs = (self.config.window_minutes * 60).max(1) as f64;

        let api_events = self.events_for_kind(EventKind::ApiRequest, now).await?;
        let cache_events = self.events_for_kind(EventKind::CacheOperation, now).await?;
        let db_events = self.events_for_kind(EventKind::DbQuery, now).await?;
        let queue_events = self.events_for_kind(EventKind::QueueOperation, now).await?;

        let mut durations: Vec<u64> = api_events.iter().map(|e| e.duration_ms).collect();
        durations.sort_unstable();
        let total = api_events.len() as u64;
        let failures = api_events.iter().filter(|e| !e.success).count() as f64;
        let api = ApiMetrics {
            total,
            avg_response_time_ms: if total > 0 { durations.iter().sum::<u64>() as f64 / total as f64 } else { 0.0 },
            p50_response_time_ms: percentile(&durations, 50.0),
            p95_response_time_ms: percentile(&durations, 95.0),
            p99_response_time_ms: percentile(&durations, 99.0),
            error_rate: if total > 0 { failures / total as f64 } else { 0.0 },
            throughput_per_sec: total as f64 / window_secs,
        };

        let cache_total = cache_events.len() as u64;
        let hits = cache_events.iter().filter(|e| e.cache_hit == Some(true)).count() as f64;
        let cache_durations: Vec<u64> = cache_events.iter().map(|e| e.duration_ms).collect();
        let cache = CacheMetrics {
            hit_rate: if cache_total > 0 { hits / cache_total as f64 } else { 0.0 },
            miss_rate: if cache_total > 0 { 1.0 - (hits / cache_total as f64) } else { 0.0 },
            avg_lookup_time_ms: if cache_total > 0 {
                cache_durations.iter().sum::<u64>() as f64 / cache_total as f64
            } else {
                0.0
            },
            key_count: cache_total,
        };

        let db_total = db_events.len() as u64;
        let slow_query_count = db_events.iter().filter(|e| e.duration_ms > SLOW_QUERY_THRESHOLD_MS).count() as u64;
        let db = DbMetrics {
            avg_query_time_ms: if db_total > 0 {
                db_events.iter().map(|e| e.duration_ms).sum::<u64>() as f64 / db_total as f64
            } else {
                0.0
            },
            queries_per_request: if total > 0 { db_total as f64 / total as f64 } else { 0.0 },
            slow_query_count,
        };

        let backlog = queue_events.iter().rev().find_map(|e| e.queue_depth).unwrap_or(0);
        let queue = QueueMetrics {
            buffer_size: backlog,
            processing_rate_per_sec: queue_events.len() as f64 / window_secs,
            backlog,
        };

        let system = SystemMetrics { memory_fraction: self.memory_fraction() };

        let snapshot = PerformanceMetrics { window_start, window_end: now, api, cache, db, queue, system };

        let fired = evaluate_alerts(&snapshot, &self.config.thresholds);
        if !fired.is_empty() {
            let mut alerts = self.alerts.write().unwrap();
            for alert in &fired {
                tracing::warn!(rule = ?alert.rule, message = %alert.message, "performance alert fired");
                alerts.push(alert.clone());
            }
            let max = self.config.max_alerts;
            if alerts.len() > max {
                let overflow = alerts.len() - max;
                alerts.drain(0..overflow);
            }
        }

        *self.last_snapshot.write().unwrap() = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub fn latest_snapshot(&self) -> Option<PerformanceMetrics> {
        self.last_snapshot.read().unwrap().clone()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.read().unwrap().clone()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile(&[], 95.0), 0);
    }

    #[test]
    fn percentile_picks_expected_rank() {
        let sorted = vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100];
        assert_eq!(percentile(&sorted, 50.0), 50);
        assert_eq!(percentile(&sorted, 95.0), 100);
        assert_eq!(percentile(&sorted, 100.0), 100);
    }

    #[test]
    fn minute_bucket_is_stable_within_the_same_minute() {
        let now = Utc::now();
        assert_eq!(minute_bucket(now), minute_bucket(now));
    }
}
