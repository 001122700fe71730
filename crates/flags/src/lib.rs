//! The feature-flag / gradual-rollout layer (spec §4.6): gates the
//! gateway's hot-path optimizations and lets operators fall back
//! instantly if one misbehaves.

pub mod registry;

pub use registry::{
    FlagError, FlagRegistry, Result, ENABLE_API_KEY_CACHE, ENABLE_ASYNC_USAGE_RECORDING,
    ENABLE_PRECOMPUTED_ACCOUNT_POOL, ENABLE_SMART_ROUTER_OPTIMIZATION,
    FALLBACK_TO_ORIGINAL_API_KEY_VALIDATION, FALLBACK_TO_ORIGINAL_ROUTER,
};
