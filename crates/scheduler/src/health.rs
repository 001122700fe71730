//! The account health registry: the concrete `HealthReporter` the
//! router consults and the `health-check` job updates (spec §4.7, §9).

use aicarpool_cache::{CacheClient, KeySpace};
use aicarpool_core::{AccountHealthStatus, Error, HealthReporter, Result};
use aicarpool_store::PostgresStore;
use async_trait::async_trait;
use std::sync::Arc;

pub struct HealthRegistry {
    cache: CacheClient,
    keys: KeySpace,
    store: Arc<PostgresStore>,
    cache_ttl_secs: i64,
}

impl HealthRegistry {
    pub fn new(cache: CacheClient, key_prefix: &str, store: Arc<PostgresStore>, cache_ttl_secs: i64) -> Self {
        Self { cache, keys: KeySpace::new(key_prefix), store, cache_ttl_secs }
    }

    async fn load(&self, account_id: &str, now: chrono::DateTime<chrono::Utc>) -> AccountHealthStatus {
        let key = self.keys.account_health(account_id);
        if let Ok(Some(status)) = self.cache.get_json::<AccountHealthStatus>(&key).await {
            return status;
        }
        if let Ok(Some(status)) = self.store.find_account_health(account_id).await {
            return status;
        }
        AccountHealthStatus {
            account_id: account_id.to_string(),
            is_healthy: true,
            response_time_ms: 0,
            consecutive_failures: 0,
            last_checked: now,
        }
    }

    async fn persist(&self, status: &AccountHealthStatus) -> Result<()> {
        let key = self.keys.account_health(&status.account_id);
        self.cache
            .setex_json(&key, self.cache_ttl_secs as u64, status)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        self.store
            .upsert_account_health(status)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl HealthReporter for HealthRegistry {
    async fn is_healthy(&self, account_id: &str) -> Result<bool> {
        Ok(self.load(account_id, chrono::Utc::now()).await.is_healthy)
    }

    async fn report_failure(&self, account_id: &str) -> Result<()> {
        let now = chrono::Utc::now();
        let mut status = self.load(account_id, now).await;
        status.record_failure(now);
        self.persist(&status).await
    }

    async fn report_success(&self, account_id: &str, response_time_ms: u64) -> Result<()> {
        let now = chrono::Utc::now();
        let mut status = self.load(account_id, now).await;
        status.record_success(response_time_ms, now);
        self.persist(&status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_healthy_with_no_failures() {
        let now = chrono::Utc::now();
        let status = AccountHealthStatus {
            account_id: "a1".into(),
            is_healthy: true,
            response_time_ms: 0,
            consecutive_failures: 0,
            last_checked: now,
        };
        assert!(status.is_healthy);
        assert_eq!(status.consecutive_failures, 0);
    }
}
