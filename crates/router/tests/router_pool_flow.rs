//! Cross-module integration test: the router's shared-pool usage-cap gate
//! (spec §4.2 step 3) against a real pool manager, store, and cache — a
//! shared pool whose member accounts already meet their own
//! `maxUsagePercent` must be excluded from the eligible set entirely.
//!
//! Requires `REDIS_URL` and `DATABASE_URL`; skips gracefully when either is
//! unset or unreachable.

use aicarpool_cache::{CacheClient, KeySpace};
use aicarpool_core::{
    AiRequest, HealthReporter, Rejection, Result, ServicePermissions, UsageRecord, UsageSink,
};
use aicarpool_pool::PoolManager;
use aicarpool_providers::AdapterRegistry;
use aicarpool_router::Router;
use aicarpool_security::{EncryptedValue, SecretsManager};
use aicarpool_store::PostgresStore;
use async_trait::async_trait;
use std::sync::Arc;

const GROUP_ID: &str = "itest-router-g1";
const ACCOUNT_ID: &str = "itest-router-acc1";
const PROVIDER_ID: &str = "claude";

struct NullUsageSink;

#[async_trait]
impl UsageSink for NullUsageSink {
    async fn enqueue(&self, _record: UsageRecord) -> Result<()> {
        Ok(())
    }
}

struct AlwaysHealthy;

#[async_trait]
impl HealthReporter for AlwaysHealthy {
    async fn is_healthy(&self, _account_id: &str) -> Result<bool> {
        Ok(true)
    }
    async fn report_failure(&self, _account_id: &str) -> Result<()> {
        Ok(())
    }
    async fn report_success(&self, _account_id: &str, _response_time_ms: u64) -> Result<()> {
        Ok(())
    }
}

struct Fixture {
    raw_pool: sqlx::PgPool,
    cache: CacheClient,
    keys: KeySpace,
}

async fn connect() -> Option<Fixture> {
    let redis_url = std::env::var("REDIS_URL").ok()?;
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let cache = CacheClient::connect(&redis_url).await.ok()?;
    let raw_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .ok()?;
    PostgresStore::from_pool(raw_pool.clone()).migrate().await.ok()?;

    Some(Fixture { raw_pool, cache, keys: KeySpace::new("itest-router:") })
}

impl Fixture {
    async fn seed(&self, max_usage_percent: f64, current_load: f64) {
        self.cleanup().await;

        sqlx::query("INSERT INTO groups (id, status, max_members, enterprise_id) VALUES ($1, 'active', 10, NULL)")
            .bind(GROUP_ID)
            .execute(&self.raw_pool)
            .await
            .unwrap();

        let credentials = EncryptedValue { nonce: vec![0; 12], ciphertext: vec![1, 2, 3] };
        sqlx::query(
            "INSERT INTO upstream_accounts \
             (id, name, provider_id, encrypted_credentials, proxy, supported_models, \
              cost_per_token, current_load, status, is_enabled) \
             VALUES ($1, 'itest account', $2, $3, NULL, $4, 0.0, $5, 'active', TRUE)",
        )
        .bind(ACCOUNT_ID)
        .bind(PROVIDER_ID)
        .bind(serde_json::to_value(&credentials).unwrap())
        .bind(serde_json::json!(["claude-3"]))
        .bind(current_load)
        .execute(&self.raw_pool)
        .await
        .unwrap();

        let config = serde_json::json!({
            "dedicated_accounts": {},
            "shared_pools": {
                PROVIDER_ID: [{
                    "pool_id": "p1",
                    "account_ids": [ACCOUNT_ID],
                    "max_usage_percent": max_usage_percent,
                }]
            },
            "hybrid_ratio": 50,
            "primary_accounts": {},
            "fallback_pools": {},
            "auto_failover": false,
            "cost_optimization": false,
        });
        sqlx::query(
            "INSERT INTO resource_bindings \
             (group_id, mode, daily_token_limit, monthly_budget, priority_level, config) \
             VALUES ($1, 'shared', 1000000, NULL, 'medium', $2)",
        )
        .bind(GROUP_ID)
        .bind(config)
        .execute(&self.raw_pool)
        .await
        .unwrap();

        let _ = self.cache.del(&self.keys.account_pool(PROVIDER_ID)).await;
        let _ = self.cache.del(&self.keys.group_binding(GROUP_ID)).await;
        let _ = self.cache.del(&self.keys.daily_quota(GROUP_ID, &chrono::Utc::now().format("%Y-%m-%d").to_string())).await;
    }

    async fn cleanup(&self) {
        let _ = sqlx::query("DELETE FROM resource_bindings WHERE group_id = $1").bind(GROUP_ID).execute(&self.raw_pool).await;
        let _ = sqlx::query("DELETE FROM account_health_checks WHERE account_id = $1").bind(ACCOUNT_ID).execute(&self.raw_pool).await;
        let _ = sqlx::query("DELETE FROM upstream_accounts WHERE id = $1").bind(ACCOUNT_ID).execute(&self.raw_pool).await;
        let _ = sqlx::query("DELETE FROM groups WHERE id = $1").bind(GROUP_ID).execute(&self.raw_pool).await;
    }
}

#[tokio::test]
async fn shared_pool_past_its_usage_cap_yields_no_account() {
    let Some(fixture) = connect().await else {
        eprintln!("skipping: REDIS_URL/DATABASE_URL not set or unreachable");
        return;
    };
    // The pool's only account already runs hotter than the pool's own cap,
    // so the whole pool must be excluded from the eligible set (not just
    // deprioritized) before any account health/load filtering happens.
    fixture.seed(50.0, 95.0).await;

    let store = Arc::new(PostgresStore::from_pool(fixture.raw_pool.clone()));
    let pool = Arc::new(PoolManager::new(fixture.cache.clone(), "itest-router:", store.clone(), 300));
    let secrets = Arc::new(SecretsManager::new("itest-router-passphrase"));

    let router = Router::new(
        fixture.cache.clone(),
        "itest-router:",
        store,
        pool,
        Arc::new(NullUsageSink),
        Arc::new(AlwaysHealthy),
        AdapterRegistry::with_defaults(),
        secrets,
        300,
    );

    let request = AiRequest {
        messages: vec![],
        provider_id: Some(PROVIDER_ID.to_string()),
        model: None,
        max_tokens: None,
        temperature: None,
        stream: false,
    };

    let result = router
        .dispatch(GROUP_ID, "itest-key", "itest-user", &ServicePermissions::all(), &request)
        .await;

    assert!(
        matches!(result, Err(Rejection::NoAccount)),
        "pool over its usage cap must reject with NoAccount, got {result:?}"
    );

    fixture.cleanup().await;
}
