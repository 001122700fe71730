//! Shared application state, built once at startup (spec §6 process
//! lifecycle) and held behind an `Arc` by every handler.

use aicarpool_flags::FlagRegistry;
use aicarpool_monitor::MonitorEngine;
use aicarpool_queue::UsageQueue;
use aicarpool_router::Router;
use aicarpool_scheduler::Scheduler;
use aicarpool_validator::Validator;
use std::sync::Arc;

pub struct GatewayState {
    pub validator: Validator,
    pub router: Router,
    pub queue: Arc<UsageQueue>,
    pub monitor: Arc<MonitorEngine>,
    pub flags: Arc<FlagRegistry>,
    pub scheduler: Arc<Scheduler>,
}
