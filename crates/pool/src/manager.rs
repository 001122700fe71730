//! Per-provider pre-computed account pools (spec §4.5).

use aicarpool_cache::{CacheClient, KeySpace};
use aicarpool_core::{
    score, AccountHealthStatus, AccountPool, AccountPoolReader, Error, PoolEntry, Result,
    UpstreamAccount,
};
use aicarpool_store::PostgresStore;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone)]
pub struct PoolManager {
    cache: CacheClient,
    keys: KeySpace,
    store: Arc<PostgresStore>,
    cache_ttl_account_pool_secs: i64,
}

impl PoolManager {
    pub fn new(
        cache: CacheClient,
        key_prefix: &str,
        store: Arc<PostgresStore>,
        cache_ttl_account_pool_secs: i64,
    ) -> Self {
        Self {
            cache,
            keys: KeySpace::new(key_prefix),
            store,
            cache_ttl_account_pool_secs,
        }
    }

    /// Background refresh (spec §4.7 `account-pool-refresh`, every
    /// `ACCOUNT_POOL_REFRESH_INTERVAL`): recompute the pool and bump its
    /// version.
    pub async fn refresh(&self, provider_id: &str) -> Result<AccountPool> {
        let now = chrono::Utc::now();
        let accounts = self
            .store
            .find_active_accounts(provider_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        let mut entries = Vec::with_capacity(accounts.len());
        for account in &accounts {
            let health_key = self.keys.account_health(&account.id);
            let health: Option<AccountHealthStatus> =
                self.cache.get_json(&health_key).await.unwrap_or(None);
            let is_healthy = health.map(|h| h.is_healthy).unwrap_or(true);
            let age_minutes = account.last_used_age_minutes(now);
            entries.push(PoolEntry {
                account_id: account.id.clone(),
                current_load: account.current_load,
                is_healthy,
                score: score(account.current_load, age_minutes, is_healthy),
            });
        }

        let pool_key = self.keys.account_pool(provider_id);
        let previous: Option<AccountPool> = self.cache.get_json(&pool_key).await.unwrap_or(None);
        let version = previous.map(|p| p.version + 1).unwrap_or(1);

        let pool = AccountPool {
            provider_id: provider_id.to_string(),
            entries,
            last_update: now,
            version,
        };

        self.cache
            .setex_json(&pool_key, self.cache_ttl_account_pool_secs as u64, &pool)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;

        tracing::debug!(provider_id, version, accounts = pool.entries.len(), "account pool refreshed");
        Ok(pool)
    }

}

#[async_trait]
impl AccountPoolReader for PoolManager {
    async fn get_pool(&self, provider_id: &str) -> Result<AccountPool> {
        let pool_key = self.keys.account_pool(provider_id);
        let cached: Option<AccountPool> = self
            .cache
            .get_json(&pool_key)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;

        match cached {
            Some(pool) => Ok(pool),
            None => self.refresh(provider_id).await,
        }
    }

    async fn get_account(&self, account_id: &str) -> Result<Option<UpstreamAccount>> {
        self.store
            .find_account(account_id)
            .await
            .map_err(|e| Error::Store(e.to_string()))
    }

    /// Spawns an asynchronous refresh without blocking the caller, used
    /// when the router observes a stale pool (spec §4.5).
    fn trigger_async_refresh(&self, provider_id: &str) {
        let this = self.clone();
        let provider_id = provider_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.refresh(&provider_id).await {
                tracing::warn!(provider_id, error = %e, "async pool refresh failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_staleness_uses_half_ttl() {
        let pool = AccountPool {
            provider_id: "claude".into(),
            entries: vec![],
            last_update: chrono::Utc::now() - chrono::Duration::seconds(61),
            version: 1,
        };
        assert!(pool.is_stale(120, chrono::Utc::now()));
    }
}
