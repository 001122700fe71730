//! iFlytek Spark adapter. Spark's public HTTP chat endpoint takes a
//! single bearer-style API key (the newer HTTP surface, not the older
//! WebSocket/HMAC-signed one), so the wire shape is close enough to
//! OpenAI's to share this adapter's error mapping but kept separate
//! since the payload and model ids are Spark-specific.

use crate::adapter::{
    build_http_client, ModelInfo, ProviderAdapter, ProxyOptions, ServiceHealth, ServiceStatus,
    ValidateCredentialsResult,
};
use aicarpool_core::{AccountUsed, AiRequest, AiResponse, ChatMessage, ProviderError, ResponsePerformance, UpstreamAccount};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const BASE_URL: &str = "https://spark-api-open.xf-yun.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Default)]
pub struct SparkAdapter;

#[derive(Debug, Serialize)]
struct SparkMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct SparkResponse {
    model: String,
    choices: Vec<SparkChoice>,
    usage: Option<SparkUsage>,
}

#[derive(Debug, Deserialize)]
struct SparkChoice {
    message: SparkChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct SparkChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct SparkUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
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

fn map_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthenticationFailed(body.to_string()),
        429 => ProviderError::QuotaExceeded(body.to_string()),
        500..=599 => ProviderError::ServiceUnavailable(body.to_string()),
        other => ProviderError::Adapter {
            code: "spark_error".into(),
            status_code: Some(other),
            message: body.to_string(),
        },
    }
}

#[async_trait]
impl ProviderAdapter for SparkAdapter {
    fn platform_id(&self) -> &str {
        "spark"
    }

    fn platform_name(&self) -> &str {
        "iFlytek Spark"
    }

    async fn validate_credentials(
        &self,
        credentials: &str,
        proxy: Option<&ProxyOptions>,
    ) -> Result<ValidateCredentialsResult, ProviderError> {
        match self.get_service_status(credentials, proxy).await {
            Ok(status) => Ok(ValidateCredentialsResult {
                is_valid: status.is_healthy,
                error_message: status.error_message,
                details: None,
            }),
            Err(ProviderError::AuthenticationFailed(msg)) => {
                Ok(ValidateCredentialsResult { is_valid: false, error_message: Some(msg), details: None })
            }
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

        let body = serde_json::json!({
            "model": "generalv3.5",
            "messages": [{"role": "user", "content": "ping"}],
        });

        let resp = client
            .post(format!("{BASE_URL}/chat/completions"))
            .bearer_auth(credentials)
            .json(&body)
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
        _credentials: &str,
        _proxy: Option<&ProxyOptions>,
    ) -> Result<Vec<ModelInfo>, ProviderError> {
        Ok(vec![ModelInfo {
            id: "generalv3.5".into(),
            name: "Spark 3.5".into(),
            description: None,
            context_length: Some(8192),
            input_price: None,
            output_price: None,
            is_available: true,
        }])
    }

    fn format_error(&self, raw: &ProviderError) -> String {
        format!("Spark error: {raw}")
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

        let messages: Vec<SparkMessage> = request
            .messages
            .iter()
            .map(|m| SparkMessage { role: m.role.clone(), content: m.content.clone() })
            .collect();
        let model = request.model.clone().unwrap_or_else(|| "generalv3.5".into());

        let resp = client
            .post(format!("{BASE_URL}/chat/completions"))
            .bearer_auth(credentials)
            .json(&serde_json::json!({ "model": model, "messages": messages }))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| ProviderError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(map_status(status, &text));
        }

        let parsed: SparkResponse = serde_json::from_str(&text).map_err(|e| ProviderError::Adapter {
            code: "invalid_response".into(),
            status_code: Some(status.as_u16()),
            message: e.to_string(),
        })?;

        let content = parsed.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default();
        let usage = parsed.usage.unwrap_or(SparkUsage { prompt_tokens: 0, completion_tokens: 0 });

        Ok(AiResponse {
            content,
            model: parsed.model,
            request_tokens: usage.prompt_tokens,
            response_tokens: usage.completion_tokens,
            account_used: AccountUsed { id: account.id.clone(), provider_id: account.provider_id.clone() },
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
    fn map_status_distinguishes_auth_from_rate_limit() {
        assert!(matches!(map_status(reqwest::StatusCode::UNAUTHORIZED, "no"), ProviderError::AuthenticationFailed(_)));
        assert!(matches!(map_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow"), ProviderError::QuotaExceeded(_)));
    }
}
