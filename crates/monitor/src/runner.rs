//! Background flush/aggregate loops for a `MonitorEngine`.

use crate::engine::MonitorEngine;
use std::sync::Arc;
use std::time::Duration;

/// Spawns the two periodic loops: flush every `flush_interval_secs`,
/// aggregate (and evaluate alerts) every `aggregation_interval_secs`.
pub fn spawn(engine: Arc<MonitorEngine>) {
    let flush_interval_secs = engine.config().flush_interval_secs;
    let aggregation_interval_secs = engine.config().aggregation_interval_secs;

    let flush_engine = engine.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(flush_interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = flush_engine.flush().await {
                tracing::warn!(error = %e, "performance event flush failed");
            }
        }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(aggregation_interval_secs));
        loop {
            ticker.tick().await;
            if let Err(e) = engine.aggregate().await {
                tracing::warn!(error = %e, "performance metrics aggregation failed");
            }
        }
    });
}
