//! PostgreSQL implementation of the primary store.

use aicarpool_core::{
    AccountHealthStatus, AccountStatus, AccountTotals, BindingConfig, BindingMode, ClientApiKey,
    Group, GroupStatus, KeyMetadata, KeyStatus, Priority, ProxyConfig, ResourceBinding,
    UpstreamAccount, UsageRecord,
};
use aicarpool_security::EncryptedValue;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("data integrity error: {0}")]
    Integrity(String),
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!("connected to PostgreSQL primary store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        let migration_sql = include_str!("../migrations/001_create_gateway_schema.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        info!("gateway schema migration complete");
        Ok(())
    }

    /// Validator §4.1 step 2: the key together with its group's status.
    pub async fn find_key_with_group(
        &self,
        key_value: &str,
    ) -> Result<Option<(ClientApiKey, Group)>, StoreError> {
        let row = sqlx::query(
            "SELECT k.id, k.key_value, k.group_id, k.user_id, k.status, k.quota_limit, \
                    k.quota_used, k.expires_at, k.metadata, k.last_used_at, \
                    g.status AS group_status, g.max_members, g.enterprise_id \
             FROM client_api_keys k JOIN groups g ON g.id = k.group_id \
             WHERE k.key_value = $1",
        )
        .bind(key_value)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let metadata: KeyMetadata = serde_json::from_value(row.try_get("metadata")?)
            .map_err(|e| StoreError::Integrity(e.to_string()))?;
        let key = ClientApiKey {
            id: row.try_get("id")?,
            key_value: row.try_get("key_value")?,
            group_id: row.try_get("group_id")?,
            user_id: row.try_get("user_id")?,
            status: parse_key_status(row.try_get("status")?)?,
            quota_limit: row.try_get::<Option<i64>, _>("quota_limit")?.map(|v| v as u64),
            quota_used: row.try_get::<i64, _>("quota_used")? as u64,
            expires_at: row.try_get("expires_at")?,
            metadata,
            last_used_at: row.try_get("last_used_at")?,
        };
        let group = Group {
            id: key.group_id.clone(),
            status: parse_group_status(row.try_get("group_status")?)?,
            max_members: row.try_get::<i32, _>("max_members")? as u32,
            enterprise_id: row.try_get("enterprise_id")?,
        };
        Ok(Some((key, group)))
    }

    pub async fn find_resource_binding(
        &self,
        group_id: &str,
    ) -> Result<Option<ResourceBinding>, StoreError> {
        let row = sqlx::query(
            "SELECT mode, daily_token_limit, monthly_budget, priority_level, config \
             FROM resource_bindings WHERE group_id = $1",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let config: BindingConfig = serde_json::from_value(row.try_get("config")?)
            .map_err(|e| StoreError::Integrity(e.to_string()))?;
        Ok(Some(ResourceBinding {
            group_id: group_id.to_string(),
            mode: parse_binding_mode(row.try_get("mode")?)?,
            daily_token_limit: row.try_get::<i64, _>("daily_token_limit")? as u64,
            monthly_budget: row.try_get("monthly_budget")?,
            priority_level: parse_priority(row.try_get("priority_level")?)?,
            config,
        }))
    }

    /// Pool manager §4.5 refresh: all enabled + active accounts for a
    /// provider.
    pub async fn find_active_accounts(
        &self,
        provider_id: &str,
    ) -> Result<Vec<UpstreamAccount>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, provider_id, encrypted_credentials, proxy, supported_models, \
                    cost_per_token, current_load, status, total_requests, total_tokens, \
                    total_cost, last_used_at \
             FROM upstream_accounts \
             WHERE provider_id = $1 AND status = 'active' AND is_enabled = TRUE",
        )
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<UpstreamAccount, StoreError> {
                let credentials: EncryptedValue =
                    serde_json::from_value(row.try_get("encrypted_credentials")?)
                        .map_err(|e| StoreError::Integrity(e.to_string()))?;
                let proxy: Option<ProxyConfig> = row
                    .try_get::<Option<serde_json::Value>, _>("proxy")?
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| StoreError::Integrity(e.to_string()))?;
                let supported_models: Vec<String> =
                    serde_json::from_value(row.try_get("supported_models")?)
                        .map_err(|e| StoreError::Integrity(e.to_string()))?;
                Ok(UpstreamAccount {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    provider_id: row.try_get("provider_id")?,
                    encrypted_credentials: credentials,
                    proxy,
                    supported_models,
                    cost_per_token: row.try_get("cost_per_token")?,
                    current_load: row.try_get("current_load")?,
                    status: parse_account_status(row.try_get("status")?)?,
                    totals: AccountTotals {
                        requests: row.try_get::<i64, _>("total_requests")? as u64,
                        tokens: row.try_get::<i64, _>("total_tokens")? as u64,
                        cost: row.try_get("total_cost")?,
                    },
                    last_used_at: row.try_get("last_used_at")?,
                })
            })
            .collect()
    }

    /// Single-account lookup, used by the pool manager and router when
    /// resolving a pool entry into its full account record.
    pub async fn find_account(&self, account_id: &str) -> Result<Option<UpstreamAccount>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, provider_id, encrypted_credentials, proxy, supported_models, \
                    cost_per_token, current_load, status, total_requests, total_tokens, \
                    total_cost, last_used_at \
             FROM upstream_accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let credentials: EncryptedValue = serde_json::from_value(row.try_get("encrypted_credentials")?)
            .map_err(|e| StoreError::Integrity(e.to_string()))?;
        let proxy: Option<ProxyConfig> = row
            .try_get::<Option<serde_json::Value>, _>("proxy")?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StoreError::Integrity(e.to_string()))?;
        let supported_models: Vec<String> = serde_json::from_value(row.try_get("supported_models")?)
            .map_err(|e| StoreError::Integrity(e.to_string()))?;
        Ok(Some(UpstreamAccount {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            provider_id: row.try_get("provider_id")?,
            encrypted_credentials: credentials,
            proxy,
            supported_models,
            cost_per_token: row.try_get("cost_per_token")?,
            current_load: row.try_get("current_load")?,
            status: parse_account_status(row.try_get("status")?)?,
            totals: AccountTotals {
                requests: row.try_get::<i64, _>("total_requests")? as u64,
                tokens: row.try_get::<i64, _>("total_tokens")? as u64,
                cost: row.try_get("total_cost")?,
            },
            last_used_at: row.try_get("last_used_at")?,
        }))
    }

    /// Account-health read used by the health-check job to seed
    /// `consecutiveFailures` across restarts.
    pub async fn find_account_health(&self, account_id: &str) -> Result<Option<AccountHealthStatus>, StoreError> {
        let row = sqlx::query(
            "SELECT account_id, is_healthy, response_time_ms, consecutive_failures, last_checked \
             FROM account_health_checks WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(AccountHealthStatus {
            account_id: row.try_get("account_id")?,
            is_healthy: row.try_get("is_healthy")?,
            response_time_ms: row.try_get::<i64, _>("response_time_ms")? as u64,
            consecutive_failures: row.try_get::<i32, _>("consecutive_failures")? as u32,
            last_checked: row.try_get("last_checked")?,
        }))
    }

    /// Queue batch writer §4.4: bulk insert skipping duplicates on `id`,
    /// then roll the totals into the touched keys and accounts.
    pub async fn insert_usage_batch(&self, records: &[UsageRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for r in records {
            let result = sqlx::query(
                "INSERT INTO usage_stats \
                 (id, group_id, user_id, account_id, api_key_id, provider_id, model_name, \
                  request_tokens, response_tokens, total_tokens, cost, request_time, \
                  response_time, metadata) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14) \
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(&r.id)
            .bind(&r.group_id)
            .bind(&r.user_id)
            .bind(&r.account_id)
            .bind(&r.api_key_id)
            .bind(&r.provider_id)
            .bind(&r.model_name)
            .bind(r.request_tokens as i64)
            .bind(r.response_tokens as i64)
            .bind(r.total_tokens as i64)
            .bind(r.cost)
            .bind(r.request_time)
            .bind(r.response_time)
            .bind(&r.metadata)
            .execute(&mut *tx)
            .await?;
            let is_new = result.rows_affected() > 0;
            inserted += result.rows_affected();

            // Skip the rollups on a duplicate `id` — the insert above was a
            // no-op, so re-applying them would double count (spec §8's
            // "re-enqueuing the same UsageRecord.id leaves the store
            // unchanged").
            if !is_new {
                continue;
            }

            if let Some(key_id) = &r.api_key_id {
                sqlx::query(
                    "UPDATE client_api_keys SET quota_used = quota_used + $1 WHERE id = $2",
                )
                .bind(r.total_tokens as i64)
                .bind(key_id)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                "UPDATE upstream_accounts \
                 SET total_requests = total_requests + 1, \
                     total_tokens = total_tokens + $1, \
                     total_cost = total_cost + $2, \
                     last_used_at = $3 \
                 WHERE id = $4",
            )
            .bind(r.total_tokens as i64)
            .bind(r.cost)
            .bind(r.response_time)
            .bind(&r.account_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Validator §4.1 step 4 cold-start fallback: today's total cost for a
    /// group, aggregated directly from the usage store.
    pub async fn aggregate_daily_cost(&self, group_id: &str, date: &str) -> Result<f64, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(cost), 0.0) AS total FROM usage_stats \
             WHERE group_id = $1 AND request_time::date = $2::date",
        )
        .bind(group_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("total")?)
    }

    /// Router §4.2 step 2 cold-start fallback: today's total token usage
    /// for a group, compared against the resource binding's `dailyTokenLimit`.
    pub async fn aggregate_daily_tokens(&self, group_id: &str, date: &str) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(total_tokens), 0) AS total FROM usage_stats \
             WHERE group_id = $1 AND request_time::date = $2::date",
        )
        .bind(group_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }

    /// Validator §4.1 step 5 cold-start fallback: request/token counts
    /// over the trailing `window_minutes`.
    pub async fn aggregate_rate_window(
        &self,
        api_key_id: &str,
        window_minutes: u32,
    ) -> Result<(u64, u64), StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS requests, COALESCE(SUM(total_tokens), 0) AS tokens \
             FROM usage_stats \
             WHERE api_key_id = $1 \
               AND request_time > NOW() - ($2 || ' minutes')::interval",
        )
        .bind(api_key_id)
        .bind(window_minutes.to_string())
        .fetch_one(&self.pool)
        .await?;
        let requests: i64 = row.try_get("requests")?;
        let tokens: i64 = row.try_get("tokens")?;
        Ok((requests as u64, tokens as u64))
    }

    /// Validator §4.1 step 6: fire-and-forget, never on the response's
    /// critical path.
    pub async fn touch_key_last_used(&self, api_key_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE client_api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(api_key_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_account_health(
        &self,
        status: &AccountHealthStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO account_health_checks \
             (account_id, is_healthy, response_time_ms, consecutive_failures, last_checked) \
             VALUES ($1,$2,$3,$4,$5) \
             ON CONFLICT (account_id) DO UPDATE SET \
                is_healthy = EXCLUDED.is_healthy, \
                response_time_ms = EXCLUDED.response_time_ms, \
                consecutive_failures = EXCLUDED.consecutive_failures, \
                last_checked = EXCLUDED.last_checked",
        )
        .bind(&status.account_id)
        .bind(status.is_healthy)
        .bind(status.response_time_ms as i64)
        .bind(status.consecutive_failures as i32)
        .bind(status.last_checked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Router §4.2 step 6b: bump (or decay) `currentLoad` by `delta`,
    /// clamped to `[0, 100]`. Called fire-and-forget right after dispatch
    /// and again, with a negated delta, after the 60s decay window.
    pub async fn adjust_account_load(&self, account_id: &str, delta: f64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE upstream_accounts SET current_load = GREATEST(0, LEAST(100, current_load + $2)) \
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `stats-cleanup` job §4.7: usage rows older than `retention_days`,
    /// plus health-check rows for accounts that haven't been probed in
    /// that long (the table keeps one row per account, not a history).
    pub async fn cleanup_old_rows(&self, retention_days: i64) -> Result<u64, StoreError> {
        let usage = sqlx::query(
            "DELETE FROM usage_stats WHERE request_time < NOW() - ($1 || ' days')::interval",
        )
        .bind(retention_days.to_string())
        .execute(&self.pool)
        .await?;

        let health = sqlx::query(
            "DELETE FROM account_health_checks WHERE last_checked < NOW() - ($1 || ' days')::interval",
        )
        .bind(retention_days.to_string())
        .execute(&self.pool)
        .await?;

        Ok(usage.rows_affected() + health.rows_affected())
    }

    /// `db-maintenance` job §4.7: analyze the hot tables.
    pub async fn analyze_hot_tables(&self) -> Result<(), StoreError> {
        sqlx::raw_sql("ANALYZE client_api_keys, upstream_accounts, usage_stats")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn parse_key_status(s: &str) -> Result<KeyStatus, StoreError> {
    match s {
        "active" => Ok(KeyStatus::Active),
        "inactive" => Ok(KeyStatus::Inactive),
        "deleted" => Ok(KeyStatus::Deleted),
        other => Err(StoreError::Integrity(format!("unknown key status {other}"))),
    }
}

fn parse_group_status(s: &str) -> Result<GroupStatus, StoreError> {
    match s {
        "active" => Ok(GroupStatus::Active),
        "inactive" => Ok(GroupStatus::Inactive),
        other => Err(StoreError::Integrity(format!("unknown group status {other}"))),
    }
}

fn parse_account_status(s: &str) -> Result<AccountStatus, StoreError> {
    match s {
        "active" => Ok(AccountStatus::Active),
        "inactive" => Ok(AccountStatus::Inactive),
        "error" => Ok(AccountStatus::Error),
        other => Err(StoreError::Integrity(format!("unknown account status {other}"))),
    }
}

fn parse_binding_mode(s: &str) -> Result<BindingMode, StoreError> {
    match s {
        "dedicated" => Ok(BindingMode::Dedicated),
        "shared" => Ok(BindingMode::Shared),
        "hybrid" => Ok(BindingMode::Hybrid),
        other => Err(StoreError::Integrity(format!("unknown binding mode {other}"))),
    }
}

fn parse_priority(s: &str) -> Result<Priority, StoreError> {
    match s {
        "low" => Ok(Priority::Low),
        "medium" => Ok(Priority::Medium),
        "high" => Ok(Priority::High),
        "critical" => Ok(Priority::Critical),
        other => Err(StoreError::Integrity(format!("unknown priority {other}"))),
    }
}
