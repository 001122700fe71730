//! # aicarpool-core
//!
//! Domain types, traits, and error definitions for the aicarpool gateway.
//! This crate has **zero framework dependencies** beyond serde/chrono/uuid
//! — it defines the domain model that every other crate implements
//! against or reads.
//!
//! ## Design philosophy
//!
//! Every subsystem seam is a trait here (`interfaces`); implementations
//! live in their own crates. All crates depend inward on `core`, never
//! the reverse.

pub mod account;
pub mod binding;
pub mod error;
pub mod flag;
pub mod group;
pub mod interfaces;
pub mod key;
pub mod pool;
pub mod quota;
pub mod session;
pub mod usage;

pub use account::{AccountStatus, AccountTotals, ProxyConfig, ProxyKind, UpstreamAccount};
pub use binding::{BindingConfig, BindingMode, Priority, ResourceBinding, SharedPool};
pub use error::{Error, ProviderError, QuotaKind, RateLimitKind, Rejection, Result, UpstreamCategory};
pub use flag::{stable_hash, FeatureFlag, FlagPhase};
pub use group::{Group, GroupStatus};
pub use interfaces::{AccountPoolReader, HealthReporter, UsageSink};
pub use key::{ClientApiKey, KeyMetadata, KeyStatus, RateLimitConfig, ServicePermissions};
pub use pool::{score, AccountHealthStatus, AccountPool, PoolEntry};
pub use quota::{DailyQuota, RateWindow};
pub use session::{AccountUsed, AiRequest, AiResponse, ChatMessage, PerformanceRecord, ResponsePerformance, Session};
pub use usage::UsageRecord;
