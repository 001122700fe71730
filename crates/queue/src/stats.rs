//! Observability types for the usage queue (spec §4.4): per-batch stats
//! plus the aggregate `getQueueStats()` snapshot.

use serde::{Deserialize, Serialize};

const RETAINED_BATCH_STATS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStat {
    pub record_count: usize,
    pub processing_time_ms: u64,
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub buffer_size: usize,
    pub is_processing: bool,
    pub total_processed: u64,
    pub total_failed: u64,
    pub avg_processing_time_ms: f64,
    pub dlq_size: u64,
}

#[derive(Debug, Default)]
pub struct StatsTracker {
    recent: std::collections::VecDeque<BatchStat>,
    pub total_processed: u64,
    pub total_failed: u64,
}

impl StatsTracker {
    pub fn record(&mut self, stat: BatchStat) {
        if stat.success {
            self.total_processed += stat.record_count as u64;
        } else {
            self.total_failed += stat.record_count as u64;
        }
        if self.recent.len() >= RETAINED_BATCH_STATS {
            self.recent.pop_front();
        }
        self.recent.push_back(stat);
    }

    pub fn avg_processing_time_ms(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.recent.iter().map(|s| s.processing_time_ms).sum();
        sum as f64 / self.recent.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retains_only_the_last_100_batches() {
        let mut tracker = StatsTracker::default();
        for i in 0..150 {
            tracker.record(BatchStat { record_count: 1, processing_time_ms: i, success: true });
        }
        assert_eq!(tracker.recent.len(), RETAINED_BATCH_STATS);
    }
}
