//! Background job scheduling for the aicarpool gateway (spec §4.7): a
//! zero-dependency cron parser, the account health registry, the seven
//! named jobs, and the supervisor that runs them.

pub mod cron;
pub mod health;
pub mod jobs;
pub mod scheduler;

pub use cron::CronExpr;
pub use health::HealthRegistry;
pub use jobs::{
    AccountPoolRefreshJob, CacheCleanupJob, DbMaintenanceJob, DlqProcessingJob, HealthCheckJob,
    JobError, JobHandler, PerformanceReportJob, StatsCleanupJob,
};
pub use scheduler::{JobRecord, JobStatus, Scheduler, SchedulerBuilder};

/// The fixed cron schedules named in spec §4.7, in the order jobs are
/// usually registered.
pub mod schedule {
    pub const HEALTH_CHECK: &str = "*/5 * * * *";
    pub const ACCOUNT_POOL_REFRESH: &str = "*/2 * * * *";
    pub const CACHE_CLEANUP: &str = "0 * * * *";
    pub const DLQ_PROCESSING: &str = "*/30 * * * *";
    pub const PERFORMANCE_REPORT: &str = "0 * * * *";
    pub const STATS_CLEANUP: &str = "0 2 * * *";
    pub const DB_MAINTENANCE: &str = "0 3 * * *";
}
