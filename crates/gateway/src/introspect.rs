//! Read-only introspection routes (spec §4.7 `D.7`): queue stats,
//! monitor snapshots, feature-flag state, and scheduled-job status. The
//! management CRUD surface itself stays a described-but-unimplemented
//! contract (spec.md §1/§6).

use crate::state::GatewayState;
use aicarpool_flags::{
    ENABLE_API_KEY_CACHE, ENABLE_ASYNC_USAGE_RECORDING, ENABLE_PRECOMPUTED_ACCOUNT_POOL,
    ENABLE_SMART_ROUTER_OPTIMIZATION, FALLBACK_TO_ORIGINAL_API_KEY_VALIDATION,
    FALLBACK_TO_ORIGINAL_ROUTER,
};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use std::sync::Arc;

const FLAG_NAMES: [&str; 6] = [
    ENABLE_API_KEY_CACHE,
    ENABLE_SMART_ROUTER_OPTIMIZATION,
    ENABLE_PRECOMPUTED_ACCOUNT_POOL,
    ENABLE_ASYNC_USAGE_RECORDING,
    FALLBACK_TO_ORIGINAL_ROUTER,
    FALLBACK_TO_ORIGINAL_API_KEY_VALIDATION,
];

#[derive(Serialize)]
pub struct HealthBody {
    status: &'static str,
    version: &'static str,
}

pub async fn health_handler() -> Json<HealthBody> {
    Json(HealthBody { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

/// `/ready`: the process is accepting traffic only once the queue's
/// DLQ drain has completed and the scheduler is up. A best-effort
/// check; it never blocks on upstream provider reachability.
pub async fn ready_handler(State(state): State<Arc<GatewayState>>) -> (StatusCode, Json<serde_json::Value>) {
    let stats = state.queue.get_queue_stats().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ready", "queue_buffer_size": stats.buffer_size })),
    )
}

pub async fn queue_stats_handler(
    State(state): State<Arc<GatewayState>>,
) -> Json<aicarpool_queue::QueueStats> {
    Json(state.queue.get_queue_stats().await)
}

pub async fn monitor_snapshot_handler(
    State(state): State<Arc<GatewayState>>,
) -> (StatusCode, Json<Option<aicarpool_monitor::PerformanceMetrics>>) {
    (StatusCode::OK, Json(state.monitor.latest_snapshot()))
}

pub async fn monitor_alerts_handler(
    State(state): State<Arc<GatewayState>>,
) -> Json<Vec<aicarpool_monitor::Alert>> {
    Json(state.monitor.active_alerts())
}

#[derive(Serialize)]
struct FlagSummary {
    name: String,
    enabled: bool,
    phase: aicarpool_core::FlagPhase,
    rollout_percentage: u8,
}

pub async fn flags_handler(State(state): State<Arc<GatewayState>>) -> Json<Vec<FlagSummary>> {
    let mut out = Vec::with_capacity(FLAG_NAMES.len());
    for name in FLAG_NAMES {
        if let Ok(flag) = state.flags.get(name).await {
            out.push(FlagSummary {
                name: flag.name,
                enabled: flag.enabled,
                phase: flag.phase,
                rollout_percentage: flag.rollout_percentage,
            });
        }
    }
    Json(out)
}

pub async fn jobs_handler(
    State(state): State<Arc<GatewayState>>,
) -> Json<Vec<aicarpool_scheduler::JobRecord>> {
    Json(state.scheduler.job_statuses().await)
}
