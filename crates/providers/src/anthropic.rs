//! Anthropic native provider adapter.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible
//! proxy):
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - system prompt as a top-level field, not a message

use crate::adapter::{
    build_http_client, ModelInfo, ProviderAdapter, ProxyOptions, ServiceHealth, ServiceStatus,
    UsageStats, ValidateCredentialsResult,
};
use aicarpool_core::{AccountUsed, AiRequest, AiResponse, ChatMessage, ProviderError, ResponsePerformance, UpstreamAccount};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TIMEOUT_SECS: u64 = 300;

pub struct AnthropicAdapter {
    base_url: String,
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Anthropic puts the system prompt as a top-level field, not in
    /// the message list.
    fn extract_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&ChatMessage> = Vec::new();

        for msg in messages {
            if msg.role == "system" {
                system_parts.push(&msg.content);
            } else {
                non_system.push(msg);
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    fn to_api_messages(messages: &[&ChatMessage]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|m| AnthropicMessage {
                role: if m.role == "assistant" { "assistant".into() } else { "user".into() },
                content: m.content.clone(),
            })
            .collect()
    }

    fn map_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
        match status.as_u16() {
            401 | 403 => ProviderError::AuthenticationFailed(body.to_string()),
            429 => ProviderError::QuotaExceeded(body.to_string()),
            500..=599 => ProviderError::ServiceUnavailable(body.to_string()),
            other => ProviderError::Adapter {
                code: "anthropic_error".into(),
                status_code: Some(other),
                message: body.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageResponse {
    content: Vec<AnthropicResponseBlock>,
    model: String,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponseBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn platform_id(&self) -> &str {
        "claude"
    }

    fn platform_name(&self) -> &str {
        "Anthropic"
    }

    async fn validate_credentials(
        &self,
        credentials: &str,
        proxy: Option<&ProxyOptions>,
    ) -> Result<ValidateCredentialsResult, ProviderError> {
        match self.get_service_status(credentials, proxy).await {
            Ok(status) if status.is_healthy => Ok(ValidateCredentialsResult {
                is_valid: true,
                error_message: None,
                details: None,
            }),
            Ok(status) => Ok(ValidateCredentialsResult {
                is_valid: false,
                error_message: status.error_message,
                details: None,
            }),
            Err(ProviderError::AuthenticationFailed(msg)) => Ok(ValidateCredentialsResult {
                is_valid: false,
                error_message: Some(msg),
                details: None,
            }),
            Err(e) => Err(e),
        }
    }

    async fn get_service_status(
        &self,
        credentials: &str,
        proxy: Option<&ProxyOptions>,
    ) -> Result<ServiceStatus, ProviderError> {
        let client = build_http_client(30, proxy)?;
        let started = std::time::Instant::now();

        let probe = serde_json::json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "ping"}],
        });

        let resp = client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", credentials)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&probe)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response_time_ms = started.elapsed().as_millis() as u64;
        let status = resp.status();

        // Anything other than an auth failure means the endpoint is
        // reachable, even if the probe request itself was rejected.
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(ServiceStatus {
                is_healthy: false,
                status: ServiceHealth::Error,
                response_time_ms,
                error_message: Some("invalid credentials".into()),
                last_checked: chrono::Utc::now(),
            });
        }

        Ok(ServiceStatus {
            is_healthy: true,
            status: ServiceHealth::Active,
            response_time_ms,
            error_message: None,
            last_checked: chrono::Utc::now(),
        })
    }

    async fn get_available_models(
        &self,
        _credentials: &str,
        _proxy: Option<&ProxyOptions>,
    ) -> Result<Vec<ModelInfo>, ProviderError> {
        Ok(vec![
            ModelInfo {
                id: "claude-sonnet-4-20250514".into(),
                name: "Claude Sonnet 4".into(),
                description: None,
                context_length: Some(200_000),
                input_price: None,
                output_price: None,
                is_available: true,
            },
            ModelInfo {
                id: "claude-opus-4-20250514".into(),
                name: "Claude Opus 4".into(),
                description: None,
                context_length: Some(200_000),
                input_price: None,
                output_price: None,
                is_available: true,
            },
        ])
    }

    fn format_error(&self, raw: &ProviderError) -> String {
        match raw {
            ProviderError::Network(m) => format!("Anthropic network error: {m}"),
            ProviderError::AuthenticationFailed(m) => format!("Anthropic authentication failed: {m}"),
            ProviderError::QuotaExceeded(m) => format!("Anthropic rate limit: {m}"),
            ProviderError::ServiceUnavailable(m) => format!("Anthropic unavailable: {m}"),
            ProviderError::Adapter { code, message, .. } => format!("Anthropic error {code}: {message}"),
        }
    }

    async fn execute_request(
        &self,
        account: &UpstreamAccount,
        credentials: &str,
        request: &AiRequest,
    ) -> Result<AiResponse, ProviderError> {
        use aicarpool_core::ProviderError as PE;

        let proxy = account.proxy.as_ref().map(|p| ProxyOptions {
            kind: match p.kind {
                aicarpool_core::ProxyKind::Http => crate::adapter::ProxyKind::Http,
                aicarpool_core::ProxyKind::Socks5 => crate::adapter::ProxyKind::Socks5,
            },
            host: p.host.clone(),
            port: p.port,
            username: p.username.clone(),
            password: p.password.clone(),
        });

        let client = build_http_client(DEFAULT_TIMEOUT_SECS, proxy.as_ref())?;
        let started = std::time::Instant::now();

        let (system, messages) = Self::extract_system(&request.messages);
        let api_messages = Self::to_api_messages(&messages);
        let model = request.model.clone().unwrap_or_else(|| "claude-sonnet-4-20250514".into());

        let mut body = serde_json::json!({
            "model": model,
            "messages": api_messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(t) = request.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(ref sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        let resp = client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", credentials)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| PE::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| PE::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::map_status(status, &text));
        }

        let parsed: AnthropicMessageResponse =
            serde_json::from_str(&text).map_err(|e| PE::Adapter {
                code: "invalid_response".into(),
                status_code: Some(status.as_u16()),
                message: e.to_string(),
            })?;

        let content = parsed
            .content
            .into_iter()
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(AiResponse {
            content,
            model: parsed.model,
            request_tokens: parsed.usage.input_tokens,
            response_tokens: parsed.usage.output_tokens,
            account_used: AccountUsed {
                id: account.id.clone(),
                provider_id: account.provider_id.clone(),
            },
            performance: ResponsePerformance {
                execution_time_ms: started.elapsed().as_millis() as u64,
                cache_hit: false,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_system_pulls_out_system_messages() {
        let messages = vec![
            ChatMessage { role: "system".into(), content: "be terse".into() },
            ChatMessage { role: "user".into(), content: "hi".into() },
        ];
        let (system, rest) = AnthropicAdapter::extract_system(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn map_status_distinguishes_auth_from_rate_limit() {
        let auth = AnthropicAdapter::map_status(reqwest::StatusCode::UNAUTHORIZED, "no");
        assert!(matches!(auth, ProviderError::AuthenticationFailed(_)));
        let rl = AnthropicAdapter::map_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(rl, ProviderError::QuotaExceeded(_)));
    }
}
