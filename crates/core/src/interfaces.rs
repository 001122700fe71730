//! Thin interfaces that break the cyclic reference between the pool
//! manager, router, and usage queue (spec §9): the router depends on
//! these traits, not on the concrete `pool`/`queue`/`scheduler` crates.

use crate::account::UpstreamAccount;
use crate::error::Result;
use crate::pool::AccountPool;
use crate::usage::UsageRecord;
use async_trait::async_trait;

/// Implemented by `aicarpool-pool`.
#[async_trait]
pub trait AccountPoolReader: Send + Sync {
    async fn get_pool(&self, provider_id: &str) -> Result<AccountPool>;

    async fn get_account(&self, account_id: &str) -> Result<Option<UpstreamAccount>>;

    /// Spawns a non-blocking refresh of the named provider's pool. Callers
    /// observe staleness themselves via the `last_update` on the
    /// `AccountPool` returned by `get_pool` (spec §4.5).
    fn trigger_async_refresh(&self, provider_id: &str);
}

/// Implemented by `aicarpool-queue`.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Accepts a record in constant time; never blocks the request task
    /// (spec §4.4, §5).
    async fn enqueue(&self, record: UsageRecord) -> Result<()>;
}

/// Implemented by `aicarpool-scheduler`'s health-check job, read by the
/// router to decide whether an account should be skipped.
#[async_trait]
pub trait HealthReporter: Send + Sync {
    async fn is_healthy(&self, account_id: &str) -> Result<bool>;

    async fn report_failure(&self, account_id: &str) -> Result<()>;

    async fn report_success(&self, account_id: &str, response_time_ms: u64) -> Result<()>;
}
