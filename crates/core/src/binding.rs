//! Resource binding — the policy that restricts which upstream accounts a
//! group may use (spec §3, §4.2).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingMode {
    Dedicated,
    Shared,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedPool {
    pub pool_id: String,
    pub account_ids: Vec<String>,
    pub max_usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Keyed by provider id — §4.2's `dedicated` eligible set.
    pub dedicated_accounts: std::collections::HashMap<String, Vec<String>>,
    /// Keyed by provider id.
    pub shared_pools: std::collections::HashMap<String, Vec<SharedPool>>,
    /// 0-100, probability of drawing from `primary_accounts` in hybrid mode.
    pub hybrid_ratio: u8,
    pub primary_accounts: std::collections::HashMap<String, Vec<String>>,
    pub fallback_pools: std::collections::HashMap<String, Vec<SharedPool>>,
    pub auto_failover: bool,
    pub cost_optimization: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceBinding {
    pub group_id: String,
    pub mode: BindingMode,
    pub daily_token_limit: u64,
    pub monthly_budget: Option<f64>,
    pub priority_level: Priority,
    pub config: BindingConfig,
}
