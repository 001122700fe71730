//! Account pool — per-provider, pre-computed, health-scored list of
//! eligible upstream accounts (spec §3, §4.5).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    pub account_id: String,
    pub current_load: f64,
    pub is_healthy: bool,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountPool {
    pub provider_id: String,
    pub entries: Vec<PoolEntry>,
    pub last_update: chrono::DateTime<chrono::Utc>,
    /// Strictly increasing per provider (testable property 8.4).
    pub version: u64,
}

impl AccountPool {
    pub fn is_stale(&self, ttl_secs: i64, now: chrono::DateTime<chrono::Utc>) -> bool {
        (now - self.last_update).num_seconds() > ttl_secs / 2
    }

    pub fn healthy_sorted(&self) -> Vec<&PoolEntry> {
        let mut healthy: Vec<&PoolEntry> = self.entries.iter().filter(|e| e.is_healthy).collect();
        healthy.sort_by(|a, b| b.score.total_cmp(&a.score));
        healthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountHealthStatus {
    pub account_id: String,
    pub is_healthy: bool,
    pub response_time_ms: u64,
    pub consecutive_failures: u32,
    pub last_checked: chrono::DateTime<chrono::Utc>,
}

impl AccountHealthStatus {
    pub const FAILURE_THRESHOLD: u32 = 3;

    pub fn record_failure(&mut self, now: chrono::DateTime<chrono::Utc>) {
        self.consecutive_failures += 1;
        self.last_checked = now;
        if self.consecutive_failures >= Self::FAILURE_THRESHOLD {
            self.is_healthy = false;
        }
    }

    pub fn record_success(&mut self, response_time_ms: u64, now: chrono::DateTime<chrono::Utc>) {
        self.consecutive_failures = 0;
        self.is_healthy = true;
        self.response_time_ms = response_time_ms;
        self.last_checked = now;
    }
}

/// `score = clamp(100 - 0.5*currentLoad - min(lastUsedAgeMinutes/60, 50), 0, 100)`
/// (spec §4.5). Unhealthy accounts score 0.
pub fn score(current_load: f64, last_used_age_minutes: f64, is_healthy: bool) -> f64 {
    if !is_healthy {
        return 0.0;
    }
    let raw = 100.0 - 0.5 * current_load - (last_used_age_minutes / 60.0).min(50.0);
    raw.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhealthy_accounts_score_zero() {
        assert_eq!(score(0.0, 0.0, false), 0.0);
    }

    #[test]
    fn score_is_clamped_to_bounds() {
        assert_eq!(score(0.0, 0.0, true), 100.0);
        assert_eq!(score(300.0, 0.0, true), 0.0);
    }

    #[test]
    fn age_contribution_is_capped_at_50() {
        let at_cap = score(0.0, 60.0 * 50.0, true);
        let beyond_cap = score(0.0, 60.0 * 500.0, true);
        assert_eq!(at_cap, 50.0);
        assert_eq!(beyond_cap, 50.0);
    }

    #[test]
    fn healthy_sorted_excludes_unhealthy_and_orders_descending() {
        let pool = AccountPool {
            provider_id: "claude".into(),
            entries: vec![
                PoolEntry { account_id: "a".into(), current_load: 0.0, is_healthy: true, score: 40.0 },
                PoolEntry { account_id: "b".into(), current_load: 0.0, is_healthy: true, score: 90.0 },
                PoolEntry { account_id: "c".into(), current_load: 0.0, is_healthy: false, score: 0.0 },
            ],
            last_update: chrono::Utc::now(),
            version: 1,
        };
        let sorted = pool.healthy_sorted();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].account_id, "b");
        assert_eq!(sorted[1].account_id, "a");
    }

    #[test]
    fn consecutive_failures_past_threshold_marks_unhealthy() {
        let mut health = AccountHealthStatus {
            account_id: "a".into(),
            is_healthy: true,
            response_time_ms: 50,
            consecutive_failures: 0,
            last_checked: chrono::Utc::now(),
        };
        for _ in 0..AccountHealthStatus::FAILURE_THRESHOLD {
            health.record_failure(chrono::Utc::now());
        }
        assert!(!health.is_healthy);
        health.record_success(10, chrono::Utc::now());
        assert!(health.is_healthy);
        assert_eq!(health.consecutive_failures, 0);
    }
}
