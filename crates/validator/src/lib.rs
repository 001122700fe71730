//! The API-key validation middleware (spec §4.1): layered Redis caches
//! over the primary store, gating every request before it reaches the
//! router.

mod cached_key;
mod validator;

pub use cached_key::CachedKey;
pub use validator::Validator;
