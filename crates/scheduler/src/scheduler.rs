//! The scheduler supervisor: fires the seven named jobs on their own
//! cron schedules, never the same job twice concurrently, with a
//! per-job timeout and a bounded concurrency budget (spec §4.7, §6).

use crate::cron::CronExpr;
use crate::jobs::JobHandler;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};

const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

/// How long shutdown waits for in-flight jobs to finish before giving up
/// (spec §4.7, §6).
const SHUTDOWN_DRAIN_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JobRecord {
    pub name: String,
    pub schedule: String,
    pub status: JobStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub run_count: u64,
    pub fail_count: u64,
    pub last_error: Option<String>,
}

impl JobRecord {
    fn new(name: &str, schedule: &str) -> Self {
        Self {
            name: name.to_string(),
            schedule: schedule.to_string(),
            status: JobStatus::Idle,
            last_run: None,
            last_duration_ms: None,
            run_count: 0,
            fail_count: 0,
            last_error: None,
        }
    }
}

struct ScheduledJob {
    handler: Arc<dyn JobHandler>,
    expr: CronExpr,
}

pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    records: RwLock<HashMap<String, JobRecord>>,
    semaphore: Arc<Semaphore>,
    max_concurrent_jobs: usize,
    job_timeout: Duration,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    /// Background tick loop (grounded on the teacher's workflow engine):
    /// wakes every 60s, fires every job whose schedule matches the
    /// current minute and hasn't already run in it, each under the
    /// concurrency semaphore and a timeout.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                let now = Utc::now();
                self.run_due(now).await;
            }
        })
    }

    async fn run_due(&self, now: DateTime<Utc>) {
        for job in &self.jobs {
            if !job.expr.matches(&now) {
                continue;
            }
            let should_fire = {
                let records = self.records.read().await;
                match records.get(job.handler.name()).and_then(|r| r.last_run) {
                    Some(last) => {
                        last.minute() != now.minute()
                            || last.hour() != now.hour()
                            || last.day() != now.day()
                    }
                    None => true,
                }
            };
            if should_fire {
                self.fire(job, now).await;
            }
        }
    }

    async fn fire(&self, job: &ScheduledJob, now: DateTime<Utc>) {
        {
            let mut records = self.records.write().await;
            if let Some(record) = records.get_mut(job.handler.name()) {
                record.last_run = Some(now);
                record.status = JobStatus::Running;
            }
        }

        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
            return;
        };
        let handler = job.handler.clone();
        let timeout = self.job_timeout;
        let name = handler.name();
        tracing::info!(job = name, "job started");
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(timeout, handler.run()).await;
        drop(permit);
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(name) {
            record.run_count += 1;
            record.last_duration_ms = Some(duration_ms);
            match outcome {
                Ok(Ok(())) => {
                    record.status = JobStatus::Succeeded;
                    record.last_error = None;
                    tracing::info!(job = name, duration_ms, "job succeeded");
                }
                Ok(Err(e)) => {
                    record.status = JobStatus::Failed;
                    record.fail_count += 1;
                    record.last_error = Some(e.to_string());
                    tracing::warn!(job = name, error = %e, "job failed");
                }
                Err(_) => {
                    record.status = JobStatus::TimedOut;
                    record.fail_count += 1;
                    record.last_error = Some(format!("timed out after {}s", timeout.as_secs()));
                    tracing::warn!(job = name, timeout_secs = timeout.as_secs(), "job timed out");
                }
            }
        }
    }

    pub async fn job_statuses(&self) -> Vec<JobRecord> {
        let records = self.records.read().await;
        let mut out: Vec<_> = records.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Runs every due job immediately, ignoring the per-minute dedup
    /// guard; intended for tests and manual operator triggers.
    pub async fn run_all_now(&self) {
        let now = Utc::now();
        for job in &self.jobs {
            self.fire(job, now).await;
        }
    }

    /// Waits up to `SHUTDOWN_DRAIN_SECS` for every in-flight job to release
    /// its semaphore permit, then returns regardless (spec §4.7: "waits up
    /// to 30s for in-flight jobs"). The tick loop itself is stopped by
    /// dropping the `JoinHandle` returned from `spawn`, not by this method.
    pub async fn shutdown(&self) {
        let wait = Duration::from_secs(SHUTDOWN_DRAIN_SECS);
        match tokio::time::timeout(wait, self.semaphore.acquire_many(self.max_concurrent_jobs as u32)).await {
            Ok(Ok(_permits)) => tracing::info!("scheduler drained with no jobs in flight"),
            Ok(Err(_)) => tracing::warn!("scheduler semaphore closed during shutdown"),
            Err(_) => tracing::warn!(
                wait_secs = SHUTDOWN_DRAIN_SECS,
                "scheduler shutdown timed out with jobs still in flight"
            ),
        }
    }
}

#[derive(Default)]
pub struct SchedulerBuilder {
    jobs: Vec<(Arc<dyn JobHandler>, String)>,
    job_timeout: Option<Duration>,
    max_concurrent_jobs: Option<usize>,
}

impl SchedulerBuilder {
    pub fn job(mut self, handler: Arc<dyn JobHandler>, schedule: impl Into<String>) -> Self {
        self.jobs.push((handler, schedule.into()));
        self
    }

    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.max_concurrent_jobs = Some(n);
        self
    }

    pub fn build(self) -> Result<Scheduler, String> {
        let mut jobs = Vec::with_capacity(self.jobs.len());
        let mut records = HashMap::with_capacity(self.jobs.len());
        for (handler, schedule) in self.jobs {
            let expr = CronExpr::parse(&schedule)?;
            records.insert(handler.name().to_string(), JobRecord::new(handler.name(), &schedule));
            jobs.push(ScheduledJob { handler, expr });
        }
        let max_concurrent_jobs = self.max_concurrent_jobs.unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS);
        Ok(Scheduler {
            jobs,
            records: RwLock::new(records),
            semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
            job_timeout: self.job_timeout.unwrap_or(Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingJob {
        name: &'static str,
        count: Arc<AtomicU64>,
    }

    #[async_trait]
    impl JobHandler for CountingJob {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn run(&self) -> Result<(), JobError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingJob;

    #[async_trait]
    impl JobHandler for FailingJob {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn run(&self) -> Result<(), JobError> {
            Err(JobError("boom".into()))
        }
    }

    #[tokio::test]
    async fn run_all_now_executes_every_job_and_records_success() {
        let count = Arc::new(AtomicU64::new(0));
        let scheduler = Scheduler::builder()
            .job(Arc::new(CountingJob { name: "tick", count: count.clone() }), "*/5 * * * *")
            .build()
            .unwrap();

        scheduler.run_all_now().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let statuses = scheduler.job_statuses().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, JobStatus::Succeeded);
        assert_eq!(statuses[0].run_count, 1);
    }

    #[tokio::test]
    async fn failed_job_increments_fail_count_and_keeps_error() {
        let scheduler = Scheduler::builder()
            .job(Arc::new(FailingJob), "0 2 * * *")
            .build()
            .unwrap();

        scheduler.run_all_now().await;

        let statuses = scheduler.job_statuses().await;
        assert_eq!(statuses[0].status, JobStatus::Failed);
        assert_eq!(statuses[0].fail_count, 1);
        assert_eq!(statuses[0].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn invalid_schedule_is_rejected_at_build_time() {
        let err = Scheduler::builder()
            .job(Arc::new(FailingJob), "not a cron expr")
            .build()
            .unwrap_err();
        assert!(err.contains("expected 5 fields"));
    }

    #[tokio::test]
    async fn shutdown_returns_immediately_when_no_job_is_in_flight() {
        let scheduler = Scheduler::builder()
            .job(Arc::new(FailingJob), "0 2 * * *")
            .build()
            .unwrap();

        let started = std::time::Instant::now();
        scheduler.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn does_not_refire_the_same_job_within_the_same_minute() {
        let count = Arc::new(AtomicU64::new(0));
        let scheduler = Scheduler::builder()
            .job(Arc::new(CountingJob { name: "tick", count: count.clone() }), "* * * * *")
            .build()
            .unwrap();

        let now = Utc::now();
        scheduler.run_due(now).await;
        scheduler.run_due(now).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
