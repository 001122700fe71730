//! The resource-binding-aware router (spec §4.2): turns a session and an
//! `AiRequest` into an `AiResponse` from some eligible upstream account.

use aicarpool_cache::{CacheClient, KeySpace};
use aicarpool_core::{
    AccountPool, AccountPoolReader, AiRequest, AiResponse, BindingMode, DailyQuota, HealthReporter,
    QuotaKind, Rejection, ResourceBinding, ServicePermissions, SharedPool, UpstreamAccount,
    UsageRecord, UsageSink,
};
use aicarpool_providers::AdapterRegistry;
use aicarpool_security::SecretsManager;
use aicarpool_store::PostgresStore;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// How long a request may spend across all retries before the router
/// gives up (spec §4.2 "Failure semantics": requests exceeding the
/// deadline are not retried).
const DEFAULT_DEADLINE_MS: u64 = 30_000;

/// `currentLoad` unit added per dispatch, capped per spec §4.2 step 6.
const LOAD_DECAY_DELAY_SECS: u64 = 60;

pub struct Router {
    cache: CacheClient,
    keys: KeySpace,
    store: Arc<PostgresStore>,
    pool: Arc<dyn AccountPoolReader>,
    usage: Arc<dyn UsageSink>,
    health: Arc<dyn HealthReporter>,
    adapters: AdapterRegistry,
    secrets: Arc<SecretsManager>,
    deadline_ms: u64,
    pool_ttl_secs: i64,
}

impl Router {
    pub fn new(
        cache: CacheClient,
        key_prefix: &str,
        store: Arc<PostgresStore>,
        pool: Arc<dyn AccountPoolReader>,
        usage: Arc<dyn UsageSink>,
        health: Arc<dyn HealthReporter>,
        adapters: AdapterRegistry,
        secrets: Arc<SecretsManager>,
        pool_ttl_secs: i64,
    ) -> Self {
        Self {
            cache,
            keys: KeySpace::new(key_prefix),
            store,
            pool,
            usage,
            health,
            adapters,
            secrets,
            deadline_ms: DEFAULT_DEADLINE_MS,
            pool_ttl_secs,
        }
    }

    pub async fn dispatch(
        &self,
        group_id: &str,
        api_key_id: &str,
        user_id: &str,
        service_permissions: &ServicePermissions,
        request: &AiRequest,
    ) -> Result<AiResponse, Rejection> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.deadline_ms);
        let provider_id = request.provider_or_default().to_string();

        if !service_permissions.permits(&provider_id) {
            return Err(Rejection::PermissionDenied { provider: provider_id });
        }

        // Step 1: concurrently retrieve the binding, the group's cached
        // daily quota, and the pre-computed pool for the requested
        // provider.
        let (binding, cached_quota, pool) = tokio::join!(
            self.load_binding(group_id),
            self.load_cached_daily_quota(group_id),
            self.pool.get_pool(&provider_id),
        );
        let binding = binding?;
        let pool = pool.map_err(|_| Rejection::NoAccount)?;

        // An age past half the pool's TTL triggers a non-blocking refresh
        // rather than waiting on one inline (spec §4.5).
        if pool.is_stale(self.pool_ttl_secs, chrono::Utc::now()) {
            self.pool.trigger_async_refresh(&provider_id);
        }

        // Step 2: a cache miss falls back to the store aggregate, using
        // the binding's own `dailyTokenLimit` as the ceiling.
        let quota = match cached_quota {
            Some(q) => q,
            None => self.load_daily_quota_fallback(group_id, binding.daily_token_limit).await,
        };
        if quota.exceeded() {
            return Err(Rejection::QuotaExceeded { kind: QuotaKind::Daily, limit: quota.limit });
        }

        // Step 3: candidate account ids per binding mode.
        let candidate_ids = select_candidates(&binding, &provider_id, &pool);
        if candidate_ids.is_empty() {
            return Err(Rejection::NoAccount);
        }

        // Step 4: filter by health/load, sort by score.
        let mut candidates: Vec<&str> = pool
            .healthy_sorted()
            .into_iter()
            .filter(|e| e.current_load < 80.0 && candidate_ids.iter().any(|id| id == &e.account_id))
            .map(|e| e.account_id.as_str())
            .collect();
        if candidates.is_empty() {
            return Err(Rejection::NoAccount);
        }

        let mut last_err = Rejection::NoAccount;
        while let Some(account_id) = candidates.first().copied() {
            candidates.remove(0);
            if tokio::time::Instant::now() >= deadline {
                break;
            }

            let Ok(Some(account)) = self.pool.get_account(account_id).await else {
                continue;
            };

            match self.try_account(&account, request).await {
                Ok((response, execution_time_ms)) => {
                    self.record_fire_and_forget(group_id, api_key_id, user_id, &account, request, &response);
                    self.adjust_load(&account, execution_time_ms);
                    let _ = self.health.report_success(&account.id, execution_time_ms).await;
                    return Ok(response);
                }
                Err(e) => {
                    let _ = self.health.report_failure(&account.id).await;
                    last_err = e.clone().into_rejection();
                    if !e.is_retryable() {
                        return Err(last_err);
                    }
                }
            }
        }

        Err(last_err)
    }

    async fn load_binding(&self, group_id: &str) -> Result<ResourceBinding, Rejection> {
        let key = self.keys.group_binding(group_id);
        if let Ok(Some(binding)) = self.cache.get_json::<ResourceBinding>(&key).await {
            return Ok(binding);
        }
        match self.store.find_resource_binding(group_id).await {
            Ok(Some(binding)) => {
                let _ = self.cache.setex_json(&key, 300, &binding).await;
                Ok(binding)
            }
            Ok(None) => Err(Rejection::NoAccount),
            Err(_) => Err(Rejection::CacheUnavailable),
        }
    }

    async fn load_cached_daily_quota(&self, group_id: &str) -> Option<DailyQuota> {
        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let key = self.keys.daily_quota(group_id, &date);
        self.cache.get_json::<DailyQuota>(&key).await.ok().flatten()
    }

    /// Cold-start fallback for step 2: aggregate today's token usage
    /// directly from the store and cache the projection for 60s.
    async fn load_daily_quota_fallback(&self, group_id: &str, daily_token_limit: u64) -> DailyQuota {
        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let used = self
            .store
            .aggregate_daily_tokens(group_id, &date)
            .await
            .unwrap_or(0);
        let quota = DailyQuota {
            group_id: group_id.to_string(),
            date: date.clone(),
            used: used as f64,
            limit: daily_token_limit as f64,
        };
        let key = self.keys.daily_quota(group_id, &date);
        let _ = self.cache.setex_json(&key, 60, &quota).await;
        quota
    }

    async fn try_account(
        &self,
        account: &UpstreamAccount,
        request: &AiRequest,
    ) -> Result<(AiResponse, u64), aicarpool_core::ProviderError> {
        let adapter = self
            .adapters
            .get(&account.provider_id)
            .ok_or_else(|| aicarpool_core::ProviderError::ServiceUnavailable("no adapter registered".into()))?;

        let credentials = self
            .secrets
            .decrypt(&account.encrypted_credentials)
            .map_err(|e| aicarpool_core::ProviderError::AuthenticationFailed(e.to_string()))?;

        let started = std::time::Instant::now();
        let response = adapter.execute_request(account, &credentials, request).await?;
        Ok((response, started.elapsed().as_millis() as u64))
    }

    fn record_fire_and_forget(
        &self,
        group_id: &str,
        api_key_id: &str,
        user_id: &str,
        account: &UpstreamAccount,
        request: &AiRequest,
        response: &AiResponse,
    ) {
        let record = UsageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            account_id: account.id.clone(),
            api_key_id: Some(api_key_id.to_string()),
            provider_id: account.provider_id.clone(),
            model_name: response.model.clone(),
            request_tokens: response.request_tokens,
            response_tokens: response.response_tokens,
            total_tokens: response.request_tokens + response.response_tokens,
            cost: account.cost_per_token * (response.request_tokens + response.response_tokens) as f64,
            request_time: chrono::Utc::now(),
            response_time: chrono::Utc::now(),
            metadata: serde_json::json!({ "stream": request.stream }),
        };

        let usage = self.usage.clone();
        tokio::spawn(
            async move {
                if let Err(e) = usage.enqueue(record).await {
                    tracing::warn!(error = %e, "failed to enqueue usage record");
                }
            }
            .in_current_span(),
        );
    }

    /// Step 6b: bump `currentLoad` then schedule a symmetric decrement
    /// after `LOAD_DECAY_DELAY_SECS` (SPEC_FULL.md D.3 — process-local,
    /// not persisted; recomputed from `lastUsedAt` on restart).
    fn adjust_load(&self, account: &UpstreamAccount, execution_time_ms: u64) {
        let delta = (execution_time_ms as f64 / 200.0).ceil().min(10.0);
        let account_id = account.id.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.adjust_account_load(&account_id, delta).await {
                tracing::warn!(error = %e, account_id, "failed to bump account load");
            }
            tokio::time::sleep(Duration::from_secs(LOAD_DECAY_DELAY_SECS)).await;
            if let Err(e) = store.adjust_account_load(&account_id, -delta).await {
                tracing::warn!(error = %e, account_id, "failed to decay account load");
            }
        });
    }
}

/// Step 3: the eligible account-id set for the requested provider,
/// dispatched on the binding's mode.
fn select_candidates(binding: &ResourceBinding, provider_id: &str, pool: &AccountPool) -> Vec<String> {
    match binding.mode {
        BindingMode::Dedicated => {
            let dedicated = binding
                .config
                .dedicated_accounts
                .get(provider_id)
                .cloned()
                .unwrap_or_default();
            if !dedicated.is_empty() {
                dedicated
            } else if binding.config.auto_failover {
                shared_pool_accounts(&binding.config.shared_pools, provider_id, pool)
            } else {
                Vec::new()
            }
        }
        BindingMode::Shared => shared_pool_accounts(&binding.config.shared_pools, provider_id, pool),
        BindingMode::Hybrid => {
            let draw: f64 = rand::rng().random();
            if draw * 100.0 < f64::from(binding.config.hybrid_ratio) {
                binding
                    .config
                    .primary_accounts
                    .get(provider_id)
                    .cloned()
                    .unwrap_or_default()
            } else {
                shared_pool_accounts(&binding.config.fallback_pools, provider_id, pool)
            }
        }
    }
}

/// Flattens every pool's `account_ids` for the provider, excluding pools
/// whose current average load already meets or exceeds their own
/// `max_usage_percent` (spec §4.2 step 3).
fn shared_pool_accounts(
    pools: &std::collections::HashMap<String, Vec<SharedPool>>,
    provider_id: &str,
    pool: &AccountPool,
) -> Vec<String> {
    pools
        .get(provider_id)
        .map(|ps| {
            ps.iter()
                .filter(|p| pool_utilization_percent(pool, &p.account_ids) < p.max_usage_percent)
                .flat_map(|p| p.account_ids.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Average `current_load` across a shared pool's member accounts, as seen
/// in the live pool snapshot. Members absent from the snapshot (not yet
/// health-checked) are treated as idle rather than excluded.
fn pool_utilization_percent(pool: &AccountPool, account_ids: &[String]) -> f64 {
    if account_ids.is_empty() {
        return 0.0;
    }
    let total: f64 = account_ids
        .iter()
        .map(|id| {
            pool.entries
                .iter()
                .find(|e| &e.account_id == id)
                .map(|e| e.current_load)
                .unwrap_or(0.0)
        })
        .sum();
    total / account_ids.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use aicarpool_core::{BindingConfig, Priority};
    use std::collections::HashMap;

    fn binding(mode: BindingMode) -> ResourceBinding {
        ResourceBinding {
            group_id: "g1".into(),
            mode,
            daily_token_limit: 100_000,
            monthly_budget: None,
            priority_level: Priority::Medium,
            config: BindingConfig {
                dedicated_accounts: HashMap::new(),
                shared_pools: HashMap::new(),
                hybrid_ratio: 50,
                primary_accounts: HashMap::new(),
                fallback_pools: HashMap::new(),
                auto_failover: false,
                cost_optimization: false,
            },
        }
    }

    /// An `AccountPool` snapshot with the given `(account_id, current_load)`
    /// entries, all marked healthy.
    fn pool_with_loads(loads: &[(&str, f64)]) -> AccountPool {
        AccountPool {
            provider_id: "claude".into(),
            entries: loads
                .iter()
                .map(|(id, load)| aicarpool_core::PoolEntry {
                    account_id: (*id).to_string(),
                    current_load: *load,
                    is_healthy: true,
                    score: 0.0,
                })
                .collect(),
            last_update: chrono::Utc::now(),
            version: 1,
        }
    }

    fn empty_pool() -> AccountPool {
        pool_with_loads(&[])
    }

    #[test]
    fn dedicated_falls_through_to_shared_when_empty_and_auto_failover() {
        let mut b = binding(BindingMode::Dedicated);
        b.config.auto_failover = true;
        b.config.shared_pools.insert(
            "claude".into(),
            vec![SharedPool { pool_id: "p1".into(), account_ids: vec!["a1".into()], max_usage_percent: 100.0 }],
        );

        assert_eq!(select_candidates(&b, "claude", &empty_pool()), vec!["a1".to_string()]);
    }

    #[test]
    fn dedicated_without_auto_failover_yields_no_candidates() {
        let b = binding(BindingMode::Dedicated);
        assert!(select_candidates(&b, "claude", &empty_pool()).is_empty());
    }

    #[test]
    fn dedicated_prefers_its_own_accounts_when_present() {
        let mut b = binding(BindingMode::Dedicated);
        b.config.dedicated_accounts.insert("claude".into(), vec!["dedicated-1".into()]);
        b.config.shared_pools.insert(
            "claude".into(),
            vec![SharedPool { pool_id: "p1".into(), account_ids: vec!["shared-1".into()], max_usage_percent: 100.0 }],
        );
        assert_eq!(
            select_candidates(&b, "claude", &empty_pool()),
            vec!["dedicated-1".to_string()]
        );
    }

    #[test]
    fn shared_flattens_every_pool_for_the_provider() {
        let mut b = binding(BindingMode::Shared);
        b.config.shared_pools.insert(
            "claude".into(),
            vec![
                SharedPool { pool_id: "p1".into(), account_ids: vec!["a1".into()], max_usage_percent: 100.0 },
                SharedPool { pool_id: "p2".into(), account_ids: vec!["a2".into()], max_usage_percent: 50.0 },
            ],
        );
        let mut candidates = select_candidates(&b, "claude", &empty_pool());
        candidates.sort();
        assert_eq!(candidates, vec!["a1".to_string(), "a2".to_string()]);
    }

    #[test]
    fn shared_pool_over_its_usage_cap_is_excluded() {
        let mut b = binding(BindingMode::Shared);
        b.config.shared_pools.insert(
            "claude".into(),
            vec![
                SharedPool { pool_id: "p1".into(), account_ids: vec!["a1".into()], max_usage_percent: 50.0 },
                SharedPool { pool_id: "p2".into(), account_ids: vec!["a2".into()], max_usage_percent: 50.0 },
            ],
        );
        let pool = pool_with_loads(&[("a1", 90.0), ("a2", 10.0)]);
        assert_eq!(select_candidates(&b, "claude", &pool), vec!["a2".to_string()]);
    }

    #[test]
    fn hybrid_at_zero_ratio_always_falls_back() {
        let mut b = binding(BindingMode::Hybrid);
        b.config.hybrid_ratio = 0;
        b.config.primary_accounts.insert("claude".into(), vec!["primary-1".into()]);
        b.config.fallback_pools.insert(
            "claude".into(),
            vec![SharedPool { pool_id: "p1".into(), account_ids: vec!["fallback-1".into()], max_usage_percent: 100.0 }],
        );
        assert_eq!(
            select_candidates(&b, "claude", &empty_pool()),
            vec!["fallback-1".to_string()]
        );
    }

    #[test]
    fn hybrid_at_full_ratio_always_prefers_primary() {
        let mut b = binding(BindingMode::Hybrid);
        b.config.hybrid_ratio = 100;
        b.config.primary_accounts.insert("claude".into(), vec!["primary-1".into()]);
        assert_eq!(
            select_candidates(&b, "claude", &empty_pool()),
            vec!["primary-1".to_string()]
        );
    }

    #[test]
    fn pool_utilization_ignores_accounts_absent_from_the_snapshot() {
        let pool = pool_with_loads(&[("a1", 40.0)]);
        assert_eq!(pool_utilization_percent(&pool, &["a1".into(), "unseen".into()]), 20.0);
    }
}
