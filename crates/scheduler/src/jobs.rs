//! The seven named jobs the scheduler runs on fixed schedules (spec §4.7).

use aicarpool_cache::{CacheClient, KeySpace};
use aicarpool_core::HealthReporter;
use aicarpool_monitor::MonitorEngine;
use aicarpool_pool::PoolManager;
use aicarpool_providers::{account_proxy_options, AdapterRegistry};
use aicarpool_queue::UsageQueue;
use aicarpool_security::SecretsManager;
use aicarpool_store::PostgresStore;
use aicarpool_validator::CachedKey;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl From<aicarpool_core::Error> for JobError {
    fn from(e: aicarpool_core::Error) -> Self {
        JobError(e.to_string())
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self) -> Result<(), JobError>;
}

/// `health-check` every 5 min: probes each pooled account via its
/// adapter and updates its `AccountHealthStatus`.
pub struct HealthCheckJob {
    pub store: Arc<PostgresStore>,
    pub health: Arc<dyn HealthReporter>,
    pub adapters: AdapterRegistry,
    pub secrets: Arc<SecretsManager>,
}

#[async_trait]
impl JobHandler for HealthCheckJob {
    fn name(&self) -> &'static str {
        "health-check"
    }

    async fn run(&self) -> Result<(), JobError> {
        for provider_id in self.adapters.provider_ids() {
            let Some(adapter) = self.adapters.get(&provider_id) else { continue };
            let accounts = self
                .store
                .find_active_accounts(&provider_id)
                .await
                .map_err(|e| JobError(e.to_string()))?;

            for account in accounts {
                let credentials = match self.secrets.decrypt(&account.encrypted_credentials) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(account_id = %account.id, error = %e, "could not decrypt account credentials for health check");
                        continue;
                    }
                };
                let proxy = account_proxy_options(&account);

                match adapter.get_service_status(&credentials, proxy.as_ref()).await {
                    Ok(status) if status.is_healthy => {
                        let _ = self.health.report_success(&account.id, status.response_time_ms).await;
                    }
                    Ok(_) => {
                        let _ = self.health.report_failure(&account.id).await;
                    }
                    Err(e) => {
                        tracing::warn!(account_id = %account.id, error = %e, "health probe failed");
                        let _ = self.health.report_failure(&account.id).await;
                    }
                }
            }
        }
        Ok(())
    }
}

/// `cache-cleanup` hourly: iterates `api_key:*` and drops entries whose
/// key has expired.
pub struct CacheCleanupJob {
    pub cache: CacheClient,
    pub keys: KeySpace,
}

#[async_trait]
impl JobHandler for CacheCleanupJob {
    fn name(&self) -> &'static str {
        "cache-cleanup"
    }

    async fn run(&self) -> Result<(), JobError> {
        let now = chrono::Utc::now();
        let keys = self
            .cache
            .scan_keys(&self.keys.api_key_pattern())
            .await
            .map_err(|e| JobError(e.to_string()))?;

        let mut removed = 0u64;
        for key in keys {
            if let Ok(Some(cached)) = self.cache.get_json::<CachedKey>(&key).await {
                if cached.key.is_expired(now) {
                    let _ = self.cache.del(&key).await;
                    removed += 1;
                }
            }
        }
        tracing::debug!(removed, "cache-cleanup removed expired api_key entries");
        Ok(())
    }
}

/// `account-pool-refresh` every 2 min: recompute every provider's
/// cached pool (spec §4.5).
pub struct AccountPoolRefreshJob {
    pub pool: Arc<PoolManager>,
    pub adapters: AdapterRegistry,
}

#[async_trait]
impl JobHandler for AccountPoolRefreshJob {
    fn name(&self) -> &'static str {
        "account-pool-refresh"
    }

    async fn run(&self) -> Result<(), JobError> {
        for provider_id in self.adapters.provider_ids() {
            self.pool.refresh(&provider_id).await.map_err(|e| JobError(e.to_string()))?;
        }
        Ok(())
    }
}

/// `dlq-processing` every 30 min: reclaim dead-lettered usage batches
/// (spec §4.4).
pub struct DlqProcessingJob {
    pub queue: Arc<UsageQueue>,
}

#[async_trait]
impl JobHandler for DlqProcessingJob {
    fn name(&self) -> &'static str {
        "dlq-processing"
    }

    async fn run(&self) -> Result<(), JobError> {
        self.queue.drain_dlq().await;
        Ok(())
    }
}

/// `performance-report` hourly: snapshots the monitor and persists the
/// digest under a per-hour cache key.
pub struct PerformanceReportJob {
    pub monitor: Arc<MonitorEngine>,
    pub cache: CacheClient,
    pub keys: KeySpace,
}

#[async_trait]
impl JobHandler for PerformanceReportJob {
    fn name(&self) -> &'static str {
        "performance-report"
    }

    async fn run(&self) -> Result<(), JobError> {
        let snapshot = self.monitor.aggregate().await.map_err(|e| JobError(e.to_string()))?;
        let bucket = chrono::Utc::now().format("%Y%m%d%H").to_string();
        let key = self.keys.performance_metrics(&bucket);
        self.cache
            .setex_json(&key, 7 * 86_400, &snapshot)
            .await
            .map_err(|e| JobError(e.to_string()))?;
        Ok(())
    }
}

/// `stats-cleanup` daily at 02:00: deletes usage and health-check rows
/// older than 30 days.
pub struct StatsCleanupJob {
    pub store: Arc<PostgresStore>,
    pub retention_days: i64,
}

#[async_trait]
impl JobHandler for StatsCleanupJob {
    fn name(&self) -> &'static str {
        "stats-cleanup"
    }

    async fn run(&self) -> Result<(), JobError> {
        let removed = self
            .store
            .cleanup_old_rows(self.retention_days)
            .await
            .map_err(|e| JobError(e.to_string()))?;
        tracing::info!(removed, "stats-cleanup removed stale rows");
        Ok(())
    }
}

/// `db-maintenance` daily at 03:00: analyze the hot tables.
pub struct DbMaintenanceJob {
    pub store: Arc<PostgresStore>,
}

#[async_trait]
impl JobHandler for DbMaintenanceJob {
    fn name(&self) -> &'static str {
        "db-maintenance"
    }

    async fn run(&self) -> Result<(), JobError> {
        self.store.analyze_hot_tables().await.map_err(|e| JobError(e.to_string()))?;
        Ok(())
    }
}
