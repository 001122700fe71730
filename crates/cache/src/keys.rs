//! The structured key families of spec §6, all namespaced under a
//! configurable prefix (default `aicarpool:`).

#[derive(Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn api_key(&self, key_value: &str) -> String {
        format!("{}api_key:{}", self.prefix, key_value)
    }

    pub fn quota_info(&self, api_key_id: &str) -> String {
        format!("{}quota_info:{}", self.prefix, api_key_id)
    }

    pub fn rate_limit(&self, api_key_id: &str, window_minutes: u32) -> String {
        format!("{}rate_limit:{}:{}m", self.prefix, api_key_id, window_minutes)
    }

    pub fn group_binding(&self, group_id: &str) -> String {
        format!("{}group_binding:{}", self.prefix, group_id)
    }

    pub fn account_health(&self, account_id: &str) -> String {
        format!("{}account_health:{}", self.prefix, account_id)
    }

    pub fn account_pool(&self, provider_id: &str) -> String {
        format!("{}account_pool:{}", self.prefix, provider_id)
    }

    pub fn daily_quota(&self, group_id: &str, date: &str) -> String {
        format!("{}daily_quota:{}:{}", self.prefix, group_id, date)
    }

    pub fn monthly_budget(&self, group_id: &str) -> String {
        format!("{}monthly_budget:{}", self.prefix, group_id)
    }

    pub fn usage_queue(&self) -> String {
        format!("{}usage_queue", self.prefix)
    }

    pub fn usage_dlq(&self) -> String {
        format!("{}usage_dlq", self.prefix)
    }

    pub fn usage_stats(&self) -> String {
        format!("{}usage_stats", self.prefix)
    }

    pub fn performance_metrics(&self, bucket: &str) -> String {
        format!("{}performance:metrics:{}", self.prefix, bucket)
    }

    pub fn performance_events(&self, event_type: &str) -> String {
        format!("{}performance:events:{}", self.prefix, event_type)
    }

    pub fn performance_alerts(&self) -> String {
        format!("{}performance:alerts", self.prefix)
    }

    pub fn feature_flags(&self, name: &str) -> String {
        format!("{}feature_flags:{}", self.prefix, name)
    }

    /// Pattern for the hourly `cache-cleanup` job's `SCAN` (spec §9: never
    /// `KEYS *`).
    pub fn api_key_pattern(&self) -> String {
        format!("{}api_key:*", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_under_prefix() {
        let ks = KeySpace::new("aicarpool:");
        assert_eq!(ks.api_key("sk-abc"), "aicarpool:api_key:sk-abc");
        assert_eq!(ks.rate_limit("k1", 60), "aicarpool:rate_limit:k1:60m");
        assert_eq!(
            ks.daily_quota("g1", "2026-07-28"),
            "aicarpool:daily_quota:g1:2026-07-28"
        );
        assert_eq!(ks.account_pool("claude"), "aicarpool:account_pool:claude");
    }
}
