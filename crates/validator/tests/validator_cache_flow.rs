//! Cross-module integration test: key validation against real Redis and
//! Postgres, covering the cache-miss/cache-hit paths and the sliding-window
//! rate limit fix (admission counters must actually increment).
//!
//! Requires `REDIS_URL` and `DATABASE_URL`; skips gracefully when either is
//! unset or unreachable, reusing the same env vars
//! `aicarpool_config::AppConfig::apply_env_overrides` reads in production.

use aicarpool_cache::{CacheClient, KeySpace};
use aicarpool_core::{BindingMode, KeyMetadata, RateLimitConfig, Rejection, ServicePermissions};
use aicarpool_flags::FlagRegistry;
use aicarpool_store::PostgresStore;
use aicarpool_validator::Validator;
use std::time::Duration;

const GROUP_ID: &str = "itest-validator-g1";
const KEY_ID: &str = "itest-validator-k1";
const KEY_VALUE: &str = "itest-sk-validator-flow";

struct Fixture {
    raw_pool: sqlx::PgPool,
    cache: CacheClient,
    keys: KeySpace,
}

/// Connects to real infra via `REDIS_URL`/`DATABASE_URL`, or returns `None`
/// so the calling test can skip instead of failing on an unavailable
/// dependency.
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

    Some(Fixture { raw_pool, cache, keys: KeySpace::new("itest-validator:") })
}

impl Fixture {
    async fn seed(&self, max_requests: u64) {
        self.cleanup().await;
        sqlx::query("INSERT INTO groups (id, status, max_members, enterprise_id) VALUES ($1, 'active', 10, NULL)")
            .bind(GROUP_ID)
            .execute(&self.raw_pool)
            .await
            .unwrap();

        let metadata = KeyMetadata {
            rate_limit: Some(RateLimitConfig { window_minutes: 1, max_requests, max_tokens: 1_000_000 }),
            service_permissions: ServicePermissions::all(),
            resource_binding: BindingMode::Shared,
            daily_cost_limit: None,
        };
        sqlx::query(
            "INSERT INTO client_api_keys \
             (id, key_value, group_id, user_id, status, quota_limit, quota_used, expires_at, metadata, last_used_at) \
             VALUES ($1, $2, $3, 'itest-user', 'active', NULL, 0, NULL, $4, NULL)",
        )
        .bind(KEY_ID)
        .bind(KEY_VALUE)
        .bind(GROUP_ID)
        .bind(serde_json::to_value(&metadata).unwrap())
        .execute(&self.raw_pool)
        .await
        .unwrap();
    }

    async fn cleanup(&self) {
        let _ = sqlx::query("DELETE FROM client_api_keys WHERE id = $1").bind(KEY_ID).execute(&self.raw_pool).await;
        let _ = sqlx::query("DELETE FROM groups WHERE id = $1").bind(GROUP_ID).execute(&self.raw_pool).await;
        let _ = self.cache.del(&self.keys.api_key(KEY_VALUE)).await;
        let rate_key = self.keys.rate_limit(KEY_ID, 1);
        let _ = self.cache.del(&rate_key).await;
        let _ = self.cache.del(&format!("{rate_key}:admitted")).await;
    }
}

#[tokio::test]
async fn cache_miss_then_hit_reports_accurate_cache_state() {
    let Some(fixture) = connect().await else {
        eprintln!("skipping: REDIS_URL/DATABASE_URL not set or unreachable");
        return;
    };
    fixture.seed(1000).await;

    let flags = std::sync::Arc::new(FlagRegistry::new(fixture.cache.clone(), "itest-validator:"));
    let validator = Validator::new(
        fixture.cache.clone(),
        "itest-validator:",
        std::sync::Arc::new(PostgresStore::from_pool(fixture.raw_pool.clone())),
        flags,
        60,
        true,
    );

    let first = validator.validate(KEY_VALUE).await.expect("first validate should admit");
    assert!(!first.performance.cache_hit, "first lookup must miss the key cache and hit the store");
    assert!(first.performance.db_queries >= 1);

    // Give the fire-and-forget cache write time to land before the next read.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let second = validator.validate(KEY_VALUE).await.expect("second validate should admit");
    assert!(second.performance.cache_hit, "second lookup should be served from the key cache");

    fixture.cleanup().await;
}

#[tokio::test]
async fn sliding_window_rejects_exactly_the_request_past_the_cap() {
    let Some(fixture) = connect().await else {
        eprintln!("skipping: REDIS_URL/DATABASE_URL not set or unreachable");
        return;
    };
    fixture.seed(3).await;

    let flags = std::sync::Arc::new(FlagRegistry::new(fixture.cache.clone(), "itest-validator:"));
    let validator = Validator::new(
        fixture.cache.clone(),
        "itest-validator:",
        std::sync::Arc::new(PostgresStore::from_pool(fixture.raw_pool.clone())),
        flags,
        60,
        true,
    );

    for attempt in 1..=3 {
        validator
            .validate(KEY_VALUE)
            .await
            .unwrap_or_else(|e| panic!("admission {attempt} of 3 should succeed, got {e:?}"));
    }

    let fourth = validator.validate(KEY_VALUE).await;
    assert!(
        matches!(fourth, Err(Rejection::RateLimited { .. })),
        "the (maxRequests+1)-th admission must be rejected, got {fourth:?}"
    );

    fixture.cleanup().await;
}
