//! Feature flags — named rollout stages with an associated default
//! percentage (spec §3, §4.6).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagPhase {
    Disabled,
    Canary,
    Gradual,
    Majority,
    Full,
}

impl FlagPhase {
    /// Default rollout percentage for this phase, used unless overridden.
    pub fn default_percentage(&self) -> u8 {
        match self {
            FlagPhase::Disabled => 0,
            FlagPhase::Canary => 5,
            FlagPhase::Gradual => 25,
            FlagPhase::Majority => 75,
            FlagPhase::Full => 100,
        }
    }

    pub fn next(&self) -> Option<FlagPhase> {
        match self {
            FlagPhase::Disabled => Some(FlagPhase::Canary),
            FlagPhase::Canary => Some(FlagPhase::Gradual),
            FlagPhase::Gradual => Some(FlagPhase::Majority),
            FlagPhase::Majority => Some(FlagPhase::Full),
            FlagPhase::Full => None,
        }
    }

    pub fn previous(&self) -> FlagPhase {
        match self {
            FlagPhase::Disabled => FlagPhase::Disabled,
            FlagPhase::Canary => FlagPhase::Disabled,
            FlagPhase::Gradual => FlagPhase::Canary,
            FlagPhase::Majority => FlagPhase::Gradual,
            FlagPhase::Full => FlagPhase::Majority,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub name: String,
    pub enabled: bool,
    pub phase: FlagPhase,
    pub rollout_percentage: u8,
    pub user_whitelist: HashSet<String>,
    pub user_blacklist: HashSet<String>,
    pub metadata: serde_json::Value,
}

impl FeatureFlag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            phase: FlagPhase::Disabled,
            rollout_percentage: 0,
            user_whitelist: HashSet::new(),
            user_blacklist: HashSet::new(),
            metadata: serde_json::json!({}),
        }
    }

    /// `isEnabled(name, userId?)` per spec §4.6.
    pub fn is_enabled_for(&self, user_id: Option<&str>, draw: f64) -> bool {
        if !self.enabled || self.phase == FlagPhase::Disabled {
            return false;
        }
        if let Some(uid) = user_id {
            if self.user_blacklist.contains(uid) {
                return false;
            }
            if self.user_whitelist.contains(uid) {
                return true;
            }
        }
        draw * 100.0 < f64::from(self.rollout_percentage)
    }

    pub fn enable(&mut self, phase: FlagPhase) {
        self.enabled = true;
        self.phase = phase;
        self.rollout_percentage = phase.default_percentage();
    }

    pub fn disable(&mut self, reason: &str) {
        tracing::info!(flag = %self.name, reason, "feature flag disabled");
        self.enabled = false;
        self.phase = FlagPhase::Disabled;
        self.rollout_percentage = 0;
    }

    pub fn promote(&mut self) {
        if let Some(next) = self.phase.next() {
            self.phase = next;
            self.rollout_percentage = next.default_percentage();
            self.enabled = true;
        }
    }

    pub fn rollback(&mut self, reason: &str) {
        tracing::info!(flag = %self.name, reason, "feature flag rolled back");
        let previous = self.phase.previous();
        self.phase = previous;
        self.rollout_percentage = previous.default_percentage();
        self.enabled = previous != FlagPhase::Disabled;
    }
}

/// Stable hash of a user id into `[0, 1)`, used for deterministic rollout
/// draws so the same user always lands on the same side of a threshold.
pub fn stable_hash(user_id: &str) -> f64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    (hasher.finish() as f64) / (u64::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_phase_always_rejects() {
        let mut flag = FeatureFlag::new("smart_router");
        flag.enabled = true;
        assert!(!flag.is_enabled_for(Some("u1"), 0.0));
    }

    #[test]
    fn blacklist_wins_over_whitelist() {
        let mut flag = FeatureFlag::new("smart_router");
        flag.enable(FlagPhase::Full);
        flag.user_whitelist.insert("u1".into());
        flag.user_blacklist.insert("u1".into());
        assert!(!flag.is_enabled_for(Some("u1"), 0.99));
    }

    #[test]
    fn promote_then_rollback_is_idempotent_round_trip() {
        let mut flag = FeatureFlag::new("smart_router");
        flag.enable(FlagPhase::Canary);
        let (phase, pct) = (flag.phase, flag.rollout_percentage);
        flag.promote();
        flag.rollback("test");
        assert_eq!(flag.phase, phase);
        assert_eq!(flag.rollout_percentage, pct);
    }

    #[test]
    fn admission_is_monotone_in_rollout_percentage() {
        let mut flag = FeatureFlag::new("smart_router");
        flag.enable(FlagPhase::Full);
        let draw = stable_hash("same-user");
        flag.rollout_percentage = 10;
        let low = flag.is_enabled_for(Some("same-user"), draw);
        flag.rollout_percentage = 90;
        let high = flag.is_enabled_for(Some("same-user"), draw);
        assert!(!low || high);
    }

    #[test]
    fn full_phase_admits_everyone() {
        let mut flag = FeatureFlag::new("smart_router");
        flag.enable(FlagPhase::Full);
        assert!(flag.is_enabled_for(None, 0.999999));
    }
}
