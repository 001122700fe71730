//! The provider adapter contract (spec §4.3). Each adapter declares
//! `platform_id`/`platform_name` and is stateless apart from a cached
//! HTTP client (spec §2 step 4).

use aicarpool_core::{AiRequest, AiResponse, ProviderError, UpstreamAccount};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Socks5,
}

#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyOptions {
    pub fn to_url(&self) -> String {
        let scheme = match self.kind {
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5",
        };
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => format!("{scheme}://{u}:{p}@{}:{}", self.host, self.port),
            _ => format!("{scheme}://{}:{}", self.host, self.port),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateCredentialsResult {
    pub is_valid: bool,
    pub error_message: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceHealth {
    Active,
    Error,
    Maintenance,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub is_healthy: bool,
    pub status: ServiceHealth,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    pub last_checked: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub context_length: Option<u32>,
    pub input_price: Option<f64>,
    pub output_price: Option<f64>,
    pub is_available: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub requests: u64,
    pub cost: f64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Each call accepts an optional proxy (spec §4.3). An HTTP client is
/// obtained per adapter with exponential backoff (base `retry_delay`,
/// factor 2) capped at `retries`; only network errors, 5xx, and 429 are
/// retryable.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn platform_id(&self) -> &str;
    fn platform_name(&self) -> &str;

    async fn validate_credentials(
        &self,
        credentials: &str,
        proxy: Option<&ProxyOptions>,
    ) -> Result<ValidateCredentialsResult, ProviderError>;

    async fn get_service_status(
        &self,
        credentials: &str,
        proxy: Option<&ProxyOptions>,
    ) -> Result<ServiceStatus, ProviderError>;

    async fn get_available_models(
        &self,
        credentials: &str,
        proxy: Option<&ProxyOptions>,
    ) -> Result<Vec<ModelInfo>, ProviderError>;

    async fn test_connection(
        &self,
        credentials: &str,
        proxy: Option<&ProxyOptions>,
    ) -> Result<bool, ProviderError> {
        Ok(self.get_service_status(credentials, proxy).await?.is_healthy)
    }

    /// Optional per spec §4.3; adapters without a usage-reporting API
    /// return `ServiceUnavailable`.
    async fn get_usage_stats(
        &self,
        _credentials: &str,
        _from: chrono::DateTime<chrono::Utc>,
        _to: chrono::DateTime<chrono::Utc>,
        _proxy: Option<&ProxyOptions>,
    ) -> Result<UsageStats, ProviderError> {
        Err(ProviderError::ServiceUnavailable(
            "usage stats not supported by this adapter".into(),
        ))
    }

    /// OAuth-only; non-OAuth adapters return `ServiceUnavailable`.
    async fn refresh_access_token(
        &self,
        _refresh_token: &str,
        _proxy: Option<&ProxyOptions>,
    ) -> Result<OAuthTokens, ProviderError> {
        Err(ProviderError::ServiceUnavailable(
            "oauth refresh not supported by this adapter".into(),
        ))
    }

    /// Localised, human-readable single-line string.
    fn format_error(&self, raw: &ProviderError) -> String;

    async fn execute_request(
        &self,
        account: &UpstreamAccount,
        credentials: &str,
        request: &AiRequest,
    ) -> Result<AiResponse, ProviderError>;
}

/// Build a reqwest client honoring the optional proxy, shared by every
/// adapter so the retry/backoff policy lives in one place.
pub fn build_http_client(
    timeout_secs: u64,
    proxy: Option<&ProxyOptions>,
) -> Result<reqwest::Client, ProviderError> {
    let mut builder = reqwest::Client::builder().timeout(std::time::Duration::from_secs(timeout_secs));
    if let Some(p) = proxy {
        let proxy = reqwest::Proxy::all(p.to_url())
            .map_err(|e| ProviderError::Network(format!("invalid proxy: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| ProviderError::Network(format!("failed to build http client: {e}")))
}

/// Converts an account's stored proxy config into the adapter-facing
/// shape, shared by callers outside the adapter implementations
/// themselves (e.g. the scheduler's `health-check` job).
pub fn account_proxy_options(account: &UpstreamAccount) -> Option<ProxyOptions> {
    account.proxy.as_ref().map(|p| ProxyOptions {
        kind: match p.kind {
            aicarpool_core::ProxyKind::Http => ProxyKind::Http,
            aicarpool_core::ProxyKind::Socks5 => ProxyKind::Socks5,
        },
        host: p.host.clone(),
        port: p.port,
        username: p.username.clone(),
        password: p.password.clone(),
    })
}

/// Whether an HTTP status should be retried against the same account
/// under the adapter's own backoff (spec §4.3: "only network errors,
/// 5xx, and 429 are retryable").
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Exponential backoff with base `retry_delay` and factor 2, capped at
/// `retries` attempts.
pub async fn retry_delay(attempt: u32, base: std::time::Duration) -> std::time::Duration {
    base * 2u32.saturating_pow(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_url_includes_credentials_when_present() {
        let proxy = ProxyOptions {
            kind: ProxyKind::Http,
            host: "proxy.internal".into(),
            port: 8080,
            username: Some("u".into()),
            password: Some("p".into()),
        };
        assert_eq!(proxy.to_url(), "http://u:p@proxy.internal:8080");
    }

    #[test]
    fn retryable_status_covers_429_and_5xx_only() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
    }
}
