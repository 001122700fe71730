//! Provider adapters for the aicarpool gateway (spec §4.3).
//!
//! Every upstream AI service is reached through a [`ProviderAdapter`],
//! registered under a stable provider id in an [`AdapterRegistry`].
//! Adapters are stateless apart from a cached HTTP client; credentials
//! and proxy settings are passed in per call by the router.

pub mod adapter;
pub mod anthropic;
pub mod openai_compat;
pub mod registry;
pub mod spark;
pub mod wenxin;

pub use adapter::{
    account_proxy_options, ModelInfo, OAuthTokens, ProviderAdapter, ProxyKind, ProxyOptions,
    ServiceHealth, ServiceStatus, UsageStats, ValidateCredentialsResult,
};
pub use anthropic::AnthropicAdapter;
pub use openai_compat::OpenAiCompatAdapter;
pub use registry::AdapterRegistry;
pub use spark::SparkAdapter;
pub use wenxin::WenxinAdapter;
