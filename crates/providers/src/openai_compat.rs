//! Adapter for every provider exposing an OpenAI-compatible
//! `/v1/chat/completions` endpoint: OpenAI itself, Qwen (DashScope
//! compatible mode), GLM (Zhipu), Kimi (Moonshot), DeepSeek, and
//! OpenRouter. This one adapter covers all of them by platform id and
//! base URL (SPEC_FULL.md §A).

use crate::adapter::{
    build_http_client, ModelInfo, ProviderAdapter, ProxyOptions, ServiceHealth, ServiceStatus,
    UsageStats, ValidateCredentialsResult,
};
use aicarpool_core::{AccountUsed, AiRequest, AiResponse, ChatMessage, ProviderError, ResponsePerformance, UpstreamAccount};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct OpenAiCompatAdapter {
    platform_id: String,
    platform_name: String,
    base_url: String,
}

impl OpenAiCompatAdapter {
    pub fn new(platform_id: impl Into<String>, platform_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            platform_id: platform_id.into(),
            platform_name: platform_name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn openai() -> Self {
        Self::new("openai", "OpenAI", "https://api.openai.com/v1")
    }

    pub fn qwen() -> Self {
        Self::new(
            "qwen",
            "Qwen",
            "https://dashscope.aliyuncs.com/compatible-mode/v1",
        )
    }

    pub fn glm() -> Self {
        Self::new("glm", "GLM", "https://open.bigmodel.cn/api/paas/v4")
    }

    pub fn kimi() -> Self {
        Self::new("kimi", "Kimi", "https://api.moonshot.cn/v1")
    }

    pub fn deepseek() -> Self {
        Self::new("deepseek", "DeepSeek", "https://api.deepseek.com/v1")
    }

    fn to_api_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.clone(),
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
                code: "openai_compat_error".into(),
                status_code: Some(other),
                message: body.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

fn account_proxy(account: &UpstreamAccount) -> Option<ProxyOptions> {
    account.proxy.as_ref().map(|p| ProxyOptions {
        kind: match p.kind {
            aicarpool_core::ProxyKind::Http => crate::adapter::ProxyKind::Http,
            aicarpool_core::ProxyKind::Socks5 => crate::adapter::ProxyKind::Socks5,
        },
        host: p.host.clone(),
        port: p.port,
        username: p.username.clone(),
        password: p.password.clone(),
    })
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn platform_id(&self) -> &str {
        &self.platform_id
    }

    fn platform_name(&self) -> &str {
        &self.platform_name
    }

    async fn validate_credentials(
        &self,
        credentials: &str,
        proxy: Option<&ProxyOptions>,
    ) -> Result<ValidateCredentialsResult, ProviderError> {
        match self.get_available_models(credentials, proxy).await {
            Ok(_) => Ok(ValidateCredentialsResult {
                is_valid: true,
                error_message: None,
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

        let resp = client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(credentials)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response_time_ms = started.elapsed().as_millis() as u64;
        let status = resp.status();

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
            is_healthy: status.is_success(),
            status: if status.is_success() { ServiceHealth::Active } else { ServiceHealth::Warning },
            response_time_ms,
            error_message: None,
            last_checked: chrono::Utc::now(),
        })
    }

    async fn get_available_models(
        &self,
        credentials: &str,
        proxy: Option<&ProxyOptions>,
    ) -> Result<Vec<ModelInfo>, ProviderError> {
        let client = build_http_client(30, proxy)?;
        let resp = client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(credentials)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| ProviderError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::map_status(status, &text));
        }

        let parsed: ModelsResponse = serde_json::from_str(&text).map_err(|e| ProviderError::Adapter {
            code: "invalid_response".into(),
            status_code: Some(status.as_u16()),
            message: e.to_string(),
        })?;

        Ok(parsed
            .data
            .into_iter()
            .map(|m| ModelInfo {
                id: m.id.clone(),
                name: m.id,
                description: None,
                context_length: None,
                input_price: None,
                output_price: None,
                is_available: true,
            })
            .collect())
    }

    async fn get_usage_stats(
        &self,
        _credentials: &str,
        _from: chrono::DateTime<chrono::Utc>,
        _to: chrono::DateTime<chrono::Utc>,
        _proxy: Option<&ProxyOptions>,
    ) -> Result<UsageStats, ProviderError> {
        Err(ProviderError::ServiceUnavailable(
            "usage stats not exposed by OpenAI-compatible endpoints".into(),
        ))
    }

    fn format_error(&self, raw: &ProviderError) -> String {
        match raw {
            ProviderError::Network(m) => format!("{} network error: {m}", self.platform_name),
            ProviderError::AuthenticationFailed(m) => format!("{} authentication failed: {m}", self.platform_name),
            ProviderError::QuotaExceeded(m) => format!("{} rate limit: {m}", self.platform_name),
            ProviderError::ServiceUnavailable(m) => format!("{} unavailable: {m}", self.platform_name),
            ProviderError::Adapter { code, message, .. } => format!("{} error {code}: {message}", self.platform_name),
        }
    }

    async fn execute_request(
        &self,
        account: &UpstreamAccount,
        credentials: &str,
        request: &AiRequest,
    ) -> Result<AiResponse, ProviderError> {
        let proxy = account_proxy(account);
        let client = build_http_client(DEFAULT_TIMEOUT_SECS, proxy.as_ref())?;
        let started = std::time::Instant::now();

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".into());

        let mut body = serde_json::json!({
            "model": model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": false,
        });
        if let Some(mt) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(mt);
        }
        if let Some(t) = request.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let resp = client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(credentials)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| ProviderError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::map_status(status, &text));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text).map_err(|e| ProviderError::Adapter {
            code: "invalid_response".into(),
            status_code: Some(status.as_u16()),
            message: e.to_string(),
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        let usage = parsed.usage.unwrap_or(Usage { prompt_tokens: 0, completion_tokens: 0 });

        Ok(AiResponse {
            content,
            model: parsed.model,
            request_tokens: usage.prompt_tokens,
            response_tokens: usage.completion_tokens,
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
    fn convenience_constructors_set_expected_base_urls() {
        assert_eq!(OpenAiCompatAdapter::qwen().base_url, "https://dashscope.aliyuncs.com/compatible-mode/v1");
        assert_eq!(OpenAiCompatAdapter::deepseek().platform_id(), "deepseek");
    }

    #[test]
    fn map_status_distinguishes_auth_from_rate_limit() {
        let auth = OpenAiCompatAdapter::map_status(reqwest::StatusCode::UNAUTHORIZED, "no");
        assert!(matches!(auth, ProviderError::AuthenticationFailed(_)));
        let rl = OpenAiCompatAdapter::map_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(rl, ProviderError::QuotaExceeded(_)));
    }
}
