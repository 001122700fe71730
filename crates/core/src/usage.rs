//! Usage record — one accounted request, at-least-once delivered with
//! idempotent insert on `id` (spec §3, §4.4).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub group_id: String,
    pub user_id: String,
    pub account_id: String,
    pub api_key_id: Option<String>,
    pub provider_id: String,
    pub model_name: String,
    pub request_tokens: u64,
    pub response_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub request_time: chrono::DateTime<chrono::Utc>,
    pub response_time: chrono::DateTime<chrono::Utc>,
    pub metadata: serde_json::Value,
}

impl UsageRecord {
    /// Invariant 3.8.1: totalTokens >= requestTokens + responseTokens - eps.
    pub fn tokens_consistent(&self) -> bool {
        self.total_tokens + 1 >= self.request_tokens + self.response_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(total: u64, req: u64, resp: u64) -> UsageRecord {
        UsageRecord {
            id: "r1".into(),
            group_id: "g1".into(),
            user_id: "u1".into(),
            account_id: "a1".into(),
            api_key_id: Some("k1".into()),
            provider_id: "claude".into(),
            model_name: "claude-3".into(),
            request_tokens: req,
            response_tokens: resp,
            total_tokens: total,
            cost: 0.01,
            request_time: chrono::Utc::now(),
            response_time: chrono::Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn exact_sum_is_consistent() {
        assert!(record(30, 10, 20).tokens_consistent());
    }

    #[test]
    fn undercount_is_inconsistent() {
        assert!(!record(10, 10, 20).tokens_consistent());
    }
}
