//! Sliding-window rate limiting and daily quota projections (spec §3, §4.1).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateWindow {
    pub api_key_id: String,
    pub window_minutes: u32,
    pub window_start: chrono::DateTime<chrono::Utc>,
    pub request_count: u64,
    pub token_count: u64,
    pub max_requests: u64,
    pub max_tokens: u64,
    pub reset_time: chrono::DateTime<chrono::Utc>,
}

impl RateWindow {
    pub fn new(
        api_key_id: String,
        window_minutes: u32,
        max_requests: u64,
        max_tokens: u64,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            api_key_id,
            window_minutes,
            window_start: now,
            request_count: 0,
            token_count: 0,
            max_requests,
            max_tokens,
            reset_time: now + chrono::Duration::seconds(i64::from(window_minutes) * 60),
        }
    }

    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now >= self.reset_time
    }

    pub fn would_exceed(&self) -> bool {
        self.request_count >= self.max_requests || self.token_count >= self.max_tokens
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyQuota {
    pub group_id: String,
    /// UTC, `YYYY-MM-DD`.
    pub date: String,
    pub used: f64,
    pub limit: f64,
}

impl DailyQuota {
    pub fn exceeded(&self) -> bool {
        self.used >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_expires_at_reset_time() {
        let now = chrono::Utc::now();
        let window = RateWindow::new("k1".into(), 1, 3, 1000, now);
        assert!(!window.is_expired(now));
        assert!(window.is_expired(now + chrono::Duration::minutes(2)));
    }

    #[test]
    fn boundary_at_exactly_max_requests_rejects_next() {
        let now = chrono::Utc::now();
        let mut window = RateWindow::new("k1".into(), 1, 3, 1000, now);
        window.request_count = 3;
        assert!(window.would_exceed());
    }

    #[test]
    fn daily_quota_exhaustion() {
        let quota = DailyQuota {
            group_id: "g1".into(),
            date: "2026-07-28".into(),
            used: 5.0,
            limit: 5.0,
        };
        assert!(quota.exceeded());
    }
}
