//! The usage-recording queue (spec §4.4): a single in-process buffer
//! accepting records in constant time, flushed in batches to the
//! primary store with a dead-letter queue for durability.

use crate::stats::{BatchStat, QueueStats, StatsTracker};
use aicarpool_cache::{CacheClient, KeySpace};
use aicarpool_core::{Error, Result, UsageRecord, UsageSink};
use aicarpool_store::PostgresStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UsageQueueConfig {
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub dlq_ttl_secs: u64,
}

impl Default for UsageQueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_secs: 10,
            max_retry_attempts: 3,
            retry_delay_secs: 1,
            dlq_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DlqEntry {
    records: Vec<UsageRecord>,
    attempts: u32,
}

pub struct UsageQueue {
    buffer: Mutex<Vec<UsageRecord>>,
    store: Arc<PostgresStore>,
    cache: CacheClient,
    keys: KeySpace,
    config: UsageQueueConfig,
    stats: Mutex<StatsTracker>,
    is_processing: AtomicBool,
    accepting: AtomicBool,
}

impl UsageQueue {
    pub fn new(
        store: Arc<PostgresStore>,
        cache: CacheClient,
        key_prefix: &str,
        config: UsageQueueConfig,
    ) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            store,
            cache,
            keys: KeySpace::new(key_prefix),
            config,
            stats: Mutex::new(StatsTracker::default()),
            is_processing: AtomicBool::new(false),
            accepting: AtomicBool::new(false),
        }
    }

    /// Drains the dead-letter queue, then begins accepting records and
    /// spawns the periodic flush loop (spec §4.4 crash safety: DLQ
    /// drains before new records are accepted).
    pub async fn start(self: &Arc<Self>) {
        self.drain_dlq().await;
        self.accepting.store(true, Ordering::SeqCst);

        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(this.config.flush_interval_secs));
            loop {
                ticker.tick().await;
                this.flush().await;
            }
        });
    }

    /// Flushes the in-memory buffer, then stops accepting new records
    /// (spec §4.4: graceful shutdown flushes before exit, refuses new
    /// records after SIGTERM/SIGINT).
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.flush().await;
    }

    fn take_buffer(&self) -> Vec<UsageRecord> {
        std::mem::take(&mut self.buffer.lock().unwrap())
    }

    pub async fn flush(&self) {
        let batch = self.take_buffer();
        if batch.is_empty() {
            return;
        }

        self.is_processing.store(true, Ordering::SeqCst);
        let started = std::time::Instant::now();
        let success = self.insert_with_retry(&batch).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.is_processing.store(false, Ordering::SeqCst);

        if success {
            self.refresh_daily_quota_projections(&batch).await;
        } else {
            self.push_to_dlq(batch.clone(), 0).await;
        }

        self.stats.lock().unwrap().record(BatchStat {
            record_count: batch.len(),
            processing_time_ms: elapsed_ms,
            success,
        });
    }

    async fn insert_with_retry(&self, records: &[UsageRecord]) -> bool {
        for attempt in 0..self.config.max_retry_attempts {
            match self.store.insert_usage_batch(records).await {
                Ok(_) => return true,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "usage batch insert failed");
                    let backoff = self.config.retry_delay_secs * 2u64.saturating_pow(attempt);
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                }
            }
        }
        false
    }

    async fn push_to_dlq(&self, records: Vec<UsageRecord>, attempts: u32) {
        let entry = DlqEntry { records, attempts };
        let key = self.keys.usage_dlq();
        if let Err(e) = self.cache.lpush_json(&key, &entry).await {
            tracing::error!(error = %e, "failed to push batch to dead-letter queue, records lost");
            return;
        }
        let _ = self.cache.expire(&key, self.config.dlq_ttl_secs as i64).await;
    }

    /// Reclaims dead-lettered batches until they succeed or their
    /// attempt counter exceeds `max_retry_attempts`, in which case the
    /// records are dropped with a logged count (spec §4.4).
    pub async fn drain_dlq(&self) {
        let key = self.keys.usage_dlq();
        let len = self.cache.llen(&key).await.unwrap_or(0);
        for _ in 0..len {
            let Ok(Some(mut entry)) = self.cache.rpop_json::<DlqEntry>(&key).await else {
                break;
            };
            if self.insert_with_retry(&entry.records).await {
                self.refresh_daily_quota_projections(&entry.records).await;
                continue;
            }
            entry.attempts += 1;
            if entry.attempts >= self.config.max_retry_attempts {
                tracing::error!(
                    dropped = entry.records.len(),
                    attempts = entry.attempts,
                    "dead-letter batch exceeded retry cap, dropping records"
                );
                continue;
            }
            self.push_to_dlq(entry.records, entry.attempts).await;
        }
    }

    /// Invalidates the cached daily-quota projection for every group
    /// touched by this batch so the validator recomputes it from the
    /// now-current store on next read, rather than racily mutating the
    /// cached total in place.
    async fn refresh_daily_quota_projections(&self, records: &[UsageRecord]) {
        let mut seen = std::collections::HashSet::new();
        for r in records {
            if let Some(api_key_id) = &r.api_key_id {
                if seen.insert(api_key_id.clone()) {
                    let key = self.keys.quota_info(api_key_id);
                    let _ = self.cache.del(&key).await;
                }
            }
        }
    }

    pub async fn get_queue_stats(&self) -> QueueStats {
        let dlq_size = self.cache.llen(&self.keys.usage_dlq()).await.unwrap_or(0);
        let (buffer_size, total_processed, total_failed, avg_processing_time_ms) = {
            let buffer_size = self.buffer.lock().unwrap().len();
            let stats = self.stats.lock().unwrap();
            (buffer_size, stats.total_processed, stats.total_failed, stats.avg_processing_time_ms())
        };
        QueueStats {
            buffer_size,
            is_processing: self.is_processing.load(Ordering::SeqCst),
            total_processed,
            total_failed,
            avg_processing_time_ms,
            dlq_size,
        }
    }
}

#[async_trait]
impl UsageSink for UsageQueue {
    async fn enqueue(&self, record: UsageRecord) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::Queue("queue is shutting down, not accepting new records".into()));
        }

        let should_flush = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.push(record);
            buffer.len() >= self.config.batch_size
        };

        if should_flush {
            self.flush().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let c = UsageQueueConfig::default();
        assert_eq!(c.batch_size, 100);
        assert_eq!(c.flush_interval_secs, 10);
        assert_eq!(c.max_retry_attempts, 3);
        assert_eq!(c.dlq_ttl_secs, 86_400);
    }
}
