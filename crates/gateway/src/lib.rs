//! HTTP API gateway for the aicarpool multi-tenant AI forwarding
//! service (spec §6): a single public forwarding endpoint authenticated
//! by the client's own API key, plus read-only introspection routes.
//! Built on Axum.

pub mod forward;
pub mod introspect;
pub mod state;

use aicarpool_cache::CacheClient;
use aicarpool_config::AppConfig;
use aicarpool_flags::{
    FlagRegistry, ENABLE_API_KEY_CACHE, ENABLE_ASYNC_USAGE_RECORDING,
    ENABLE_PRECOMPUTED_ACCOUNT_POOL, ENABLE_SMART_ROUTER_OPTIMIZATION,
    FALLBACK_TO_ORIGINAL_API_KEY_VALIDATION, FALLBACK_TO_ORIGINAL_ROUTER,
};
use aicarpool_monitor::{MonitorConfig, MonitorEngine};
use aicarpool_pool::PoolManager;
use aicarpool_providers::AdapterRegistry;
use aicarpool_queue::{UsageQueue, UsageQueueConfig};
use aicarpool_router::Router as DispatchRouter;
use aicarpool_scheduler::{jobs, schedule, HealthRegistry, Scheduler};
use aicarpool_security::SecretsManager;
use aicarpool_store::PostgresStore;
use aicarpool_validator::Validator;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router as AxumRouter;
use state::GatewayState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] aicarpool_config::ConfigError),
    #[error("cache connection failed: {0}")]
    Cache(#[from] aicarpool_cache::CacheError),
    #[error("store connection failed: {0}")]
    Store(#[from] aicarpool_store::StoreError),
    #[error("credentials passphrase not configured")]
    MissingPassphrase,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid scheduler configuration: {0}")]
    Scheduler(String),
}

/// Build the Axum router: the forwarding endpoint behind bearer auth
/// (the validator itself rejects unknown/expired keys), introspection
/// routes, CORS, a 1 MB body limit, and HTTP trace logging.
pub fn build_router(state: Arc<GatewayState>) -> AxumRouter {
    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_origin(tower_http::cors::Any)
        .max_age(Duration::from_secs(3600));

    AxumRouter::new()
        .route("/v1/chat", post(forward::forward_handler))
        .route("/v1/chat/completions", post(forward::forward_handler))
        .route("/v1/introspect/queue", get(introspect::queue_stats_handler))
        .route("/v1/introspect/monitor", get(introspect::monitor_snapshot_handler))
        .route("/v1/introspect/monitor/alerts", get(introspect::monitor_alerts_handler))
        .route("/v1/introspect/flags", get(introspect::flags_handler))
        .route("/v1/introspect/jobs", get(introspect::jobs_handler))
        .route("/health", get(introspect::health_handler))
        .route("/ready", get(introspect::ready_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

const OPTIMIZATION_DEFAULTS: &[(&str, bool)] = &[
    (ENABLE_API_KEY_CACHE, true),
    (ENABLE_SMART_ROUTER_OPTIMIZATION, true),
    (ENABLE_PRECOMPUTED_ACCOUNT_POOL, true),
    (ENABLE_ASYNC_USAGE_RECORDING, true),
    (FALLBACK_TO_ORIGINAL_ROUTER, false),
    (FALLBACK_TO_ORIGINAL_API_KEY_VALIDATION, false),
];

/// Start the gateway: open cache/store, seed flag defaults, start the
/// monitor/scheduler/queue, bind, serve, and wait on `SIGTERM`/`SIGINT`
/// for a graceful shutdown (spec §6 process lifecycle).
pub async fn start(config: AppConfig) -> Result<(), GatewayError> {
    let cache = CacheClient::connect(&config.cache.redis_url).await?;
    let store = Arc::new(
        PostgresStore::connect(&config.store.database_url, config.store.max_connections).await?,
    );
    let passphrase = config
        .credentials_passphrase
        .clone()
        .ok_or(GatewayError::MissingPassphrase)?;
    let secrets = Arc::new(SecretsManager::new(&passphrase));

    let flags = Arc::new(FlagRegistry::new(cache.clone(), &config.cache.key_prefix));
    for (name, enabled) in OPTIMIZATION_DEFAULTS {
        if let Err(e) = flags.seed_if_absent(name, *enabled).await {
            warn!(flag = name, error = %e, "failed to seed feature flag default");
        }
    }

    let adapters = AdapterRegistry::with_defaults();
    let health = Arc::new(HealthRegistry::new(
        cache.clone(),
        &config.cache.key_prefix,
        store.clone(),
        config.cache.cache_ttl_account_pool_secs as i64,
    ));
    let pool = Arc::new(PoolManager::new(
        cache.clone(),
        &config.cache.key_prefix,
        store.clone(),
        config.cache.cache_ttl_account_pool_secs as i64,
    ));

    let queue_config = UsageQueueConfig {
        batch_size: config.queue.usage_batch_size,
        flush_interval_secs: config.queue.usage_flush_interval_secs,
        max_retry_attempts: config.queue.usage_max_retries,
        retry_delay_secs: config.queue.usage_retry_delay_secs,
        dlq_ttl_secs: config.queue.usage_dlq_ttl_secs,
    };
    let queue = Arc::new(UsageQueue::new(
        store.clone(),
        cache.clone(),
        &config.cache.key_prefix,
        queue_config,
    ));
    queue.start().await;

    let router = DispatchRouter::new(
        cache.clone(),
        &config.cache.key_prefix,
        store.clone(),
        pool.clone(),
        queue.clone(),
        health.clone(),
        adapters.clone(),
        secrets.clone(),
        config.cache.cache_ttl_account_pool_secs as i64,
    );
    let validator = Validator::new(
        cache.clone(),
        &config.cache.key_prefix,
        store.clone(),
        flags.clone(),
        config.cache.cache_ttl_api_key_secs,
        config.cache.cache_fallback_to_db,
    );

    let monitor_config = MonitorConfig {
        aggregation_interval_secs: config.monitor.metrics_collection_interval_secs,
        thresholds: aicarpool_monitor::AlertThresholds {
            p95_latency_ms: config.monitor.alert_response_time_p95_ms,
            error_rate: config.monitor.alert_error_rate,
            cache_hit_rate: config.monitor.alert_cache_hit_rate,
            queue_backlog: config.monitor.alert_queue_backlog,
        },
        ..MonitorConfig::default()
    };
    let monitor = Arc::new(MonitorEngine::new(cache.clone(), &config.cache.key_prefix, monitor_config));
    aicarpool_monitor::spawn(monitor.clone());

    let scheduler = Arc::new(build_scheduler(
        &config,
        store.clone(),
        cache.clone(),
        health.clone(),
        adapters.clone(),
        secrets.clone(),
        pool.clone(),
        queue.clone(),
        monitor.clone(),
    )?);
    scheduler.clone().spawn();

    let state = Arc::new(GatewayState { validator, router, queue: queue.clone(), monitor, flags, scheduler });
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.bind_host, config.server.bind_port);
    info!(addr = %addr, "gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(queue, scheduler))
        .await?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_scheduler(
    config: &AppConfig,
    store: Arc<PostgresStore>,
    cache: CacheClient,
    health: Arc<HealthRegistry>,
    adapters: AdapterRegistry,
    secrets: Arc<SecretsManager>,
    pool: Arc<PoolManager>,
    queue: Arc<UsageQueue>,
    monitor: Arc<MonitorEngine>,
) -> Result<Scheduler, GatewayError> {
    let keys = aicarpool_cache::KeySpace::new(&config.cache.key_prefix);

    Scheduler::builder()
        .job(
            Arc::new(jobs::HealthCheckJob { store: store.clone(), health, adapters: adapters.clone(), secrets }),
            schedule::HEALTH_CHECK,
        )
        .job(
            Arc::new(jobs::CacheCleanupJob { cache: cache.clone(), keys: keys.clone() }),
            schedule::CACHE_CLEANUP,
        )
        .job(
            Arc::new(jobs::AccountPoolRefreshJob { pool, adapters }),
            schedule::ACCOUNT_POOL_REFRESH,
        )
        .job(Arc::new(jobs::DlqProcessingJob { queue }), schedule::DLQ_PROCESSING)
        .job(
            Arc::new(jobs::PerformanceReportJob { monitor, cache, keys }),
            schedule::PERFORMANCE_REPORT,
        )
        .job(
            Arc::new(jobs::StatsCleanupJob { store: store.clone(), retention_days: 30 }),
            schedule::STATS_CLEANUP,
        )
        .job(Arc::new(jobs::DbMaintenanceJob { store }), schedule::DB_MAINTENANCE)
        .max_concurrent_jobs(config.scheduler.max_concurrent_jobs)
        .job_timeout(Duration::from_secs(config.scheduler.job_timeout_secs))
        .build()
        .map_err(GatewayError::Scheduler)
}

/// Waits for `SIGTERM`/`SIGINT`, then refuses new enqueues, flushes the
/// usage buffer, and gives outstanding jobs up to 30s before returning
/// control to `axum::serve` (spec §6 process lifecycle).
async fn shutdown_signal(queue: Arc<UsageQueue>, scheduler: Arc<Scheduler>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sigterm) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            return;
        };
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    warn!("shutdown signal received, draining in-flight work");
    let drain = async {
        // The scheduler's own `shutdown` already bounds itself to 30s; the
        // queue flush is a single bounded batch write, so the outer
        // timeout below only has to cover variance, not a second full
        // budget.
        scheduler.shutdown().await;
        queue.shutdown().await;
    };
    if tokio::time::timeout(Duration::from_secs(35), drain).await.is_err() {
        warn!("graceful shutdown exceeded budget, exiting anyway");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimization_defaults_match_spec_initial_values() {
        let map: HashMap<_, _> = OPTIMIZATION_DEFAULTS.iter().copied().collect();
        assert!(map[ENABLE_API_KEY_CACHE]);
        assert!(!map[FALLBACK_TO_ORIGINAL_ROUTER]);
    }
}
