//! Feature-flag registry (spec §4.6): cache-backed, mirrored in a
//! 60-second local cache so the hot path never blocks on Redis for a
//! flag check.

use aicarpool_cache::{CacheClient, KeySpace};
use aicarpool_core::{stable_hash, FeatureFlag, FlagPhase};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const LOCAL_TTL: Duration = Duration::from_secs(60);

/// The optimization flags the gateway gates its hot-path shortcuts
/// behind, and their paired fallback flags (spec §6 `FlagDefaults`).
pub const ENABLE_API_KEY_CACHE: &str = "enable_api_key_cache";
pub const ENABLE_SMART_ROUTER_OPTIMIZATION: &str = "enable_smart_router_optimization";
pub const ENABLE_PRECOMPUTED_ACCOUNT_POOL: &str = "enable_precomputed_account_pool";
pub const ENABLE_ASYNC_USAGE_RECORDING: &str = "enable_async_usage_recording";
pub const FALLBACK_TO_ORIGINAL_ROUTER: &str = "fallback_to_original_router";
pub const FALLBACK_TO_ORIGINAL_API_KEY_VALIDATION: &str = "fallback_to_original_api_key_validation";

const OPTIMIZATION_FLAGS: &[&str] = &[
    ENABLE_API_KEY_CACHE,
    ENABLE_SMART_ROUTER_OPTIMIZATION,
    ENABLE_PRECOMPUTED_ACCOUNT_POOL,
    ENABLE_ASYNC_USAGE_RECORDING,
];

const FALLBACK_FLAGS: &[&str] = &[FALLBACK_TO_ORIGINAL_ROUTER, FALLBACK_TO_ORIGINAL_API_KEY_VALIDATION];

#[derive(Debug, thiserror::Error)]
pub enum FlagError {
    #[error("cache error: {0}")]
    Cache(#[from] aicarpool_cache::CacheError),
}

pub type Result<T> = std::result::Result<T, FlagError>;

struct LocalEntry {
    flag: FeatureFlag,
    cached_at: Instant,
}

pub struct FlagRegistry {
    cache: CacheClient,
    keys: KeySpace,
    local: Mutex<HashMap<String, LocalEntry>>,
}

impl FlagRegistry {
    pub fn new(cache: CacheClient, key_prefix: &str) -> Self {
        Self {
            cache,
            keys: KeySpace::new(key_prefix),
            local: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a flag, consulting the 60-second local cache first, then
    /// Redis, defaulting to a freshly disabled flag when neither has
    /// one (a flag that was never explicitly created behaves as off).
    pub async fn get(&self, name: &str) -> Result<FeatureFlag> {
        if let Some(entry) = self.local.lock().unwrap().get(name) {
            if entry.cached_at.elapsed() < LOCAL_TTL {
                return Ok(entry.flag.clone());
            }
        }

        let key = self.keys.feature_flags(name);
        let flag = match self.cache.get_json::<FeatureFlag>(&key).await? {
            Some(f) => f,
            None => FeatureFlag::new(name),
        };

        self.local.lock().unwrap().insert(
            name.to_string(),
            LocalEntry { flag: flag.clone(), cached_at: Instant::now() },
        );
        Ok(flag)
    }

    async fn put(&self, flag: &FeatureFlag) -> Result<()> {
        let key = self.keys.feature_flags(&flag.name);
        self.cache.set_json(&key, flag).await?;
        self.local.lock().unwrap().insert(
            flag.name.clone(),
            LocalEntry { flag: flag.clone(), cached_at: Instant::now() },
        );
        Ok(())
    }

    /// `isEnabled(name, userId?)` (spec §4.6). With no `userId`, draws
    /// a fresh random number each call rather than a stable hash.
    pub async fn is_enabled(&self, name: &str, user_id: Option<&str>) -> Result<bool> {
        let flag = self.get(name).await?;
        let draw = match user_id {
            Some(uid) => stable_hash(uid),
            None => rand::random::<f64>(),
        };
        Ok(flag.is_enabled_for(user_id, draw))
    }

    pub async fn enable_feature(&self, name: &str, phase: FlagPhase) -> Result<()> {
        let mut flag = self.get(name).await?;
        flag.enable(phase);
        self.put(&flag).await
    }

    pub async fn disable_feature(&self, name: &str, reason: &str) -> Result<()> {
        let mut flag = self.get(name).await?;
        flag.disable(reason);
        self.put(&flag).await
    }

    pub async fn promote_feature(&self, name: &str) -> Result<()> {
        let mut flag = self.get(name).await?;
        flag.promote();
        self.put(&flag).await
    }

    pub async fn rollback_feature(&self, name: &str, reason: &str) -> Result<()> {
        let mut flag = self.get(name).await?;
        flag.rollback(reason);
        self.put(&flag).await
    }

    /// Atomically disables every optimization flag and enables every
    /// fallback flag (spec §4.6).
    pub async fn emergency_disable_all_optimizations(&self, reason: &str) -> Result<()> {
        for name in OPTIMIZATION_FLAGS {
            self.disable_feature(name, reason).await?;
        }
        for name in FALLBACK_FLAGS {
            self.enable_feature(name, FlagPhase::Full).await?;
        }
        tracing::warn!(reason, "all optimizations disabled, fallbacks engaged");
        Ok(())
    }

    /// Writes a flag's initial state only if nothing is stored for it
    /// yet (spec §6 process lifecycle: "initialize feature flags,
    /// writing defaults only if absent").
    pub async fn seed_if_absent(&self, name: &str, enabled: bool) -> Result<()> {
        let key = self.keys.feature_flags(name);
        if self.cache.get_json::<FeatureFlag>(&key).await?.is_some() {
            return Ok(());
        }
        let mut flag = FeatureFlag::new(name);
        if enabled {
            flag.enable(FlagPhase::Full);
        }
        self.put(&flag).await
    }

    /// The inverse of emergency disable: re-enters optimizations at
    /// canary and disengages the fallbacks.
    pub async fn restore_all_optimizations(&self) -> Result<()> {
        for name in OPTIMIZATION_FLAGS {
            self.enable_feature(name, FlagPhase::Canary).await?;
        }
        for name in FALLBACK_FLAGS {
            self.disable_feature(name, "optimizations restored").await?;
        }
        tracing::info!("optimizations restored at canary phase");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimization_and_fallback_flag_lists_are_disjoint() {
        for f in OPTIMIZATION_FLAGS {
            assert!(!FALLBACK_FLAGS.contains(f));
        }
    }
}
