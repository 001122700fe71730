//! Baidu Wenxin (ERNIE) adapter. Wenxin's chat endpoint takes the
//! access token as a query parameter rather than a header, and the
//! access token itself is minted from an API key/secret pair — callers
//! store the already-minted access token as the account credential and
//! this adapter treats it as opaque, like every other adapter.

use crate::adapter::{
    build_http_client, ModelInfo, ProviderAdapter, ProxyOptions, ServiceHealth, ServiceStatus,
    ValidateCredentialsResult,
};
use aicarpool_core::{AccountUsed, AiRequest, AiResponse, ChatMessage, ProviderError, ResponsePerformance, UpstreamAccount};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const BASE_URL: &str = "https://aip.baidubce.com/rpc/2.0/ai_custom/v1/wenxinworkshop/chat";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Default)]
pub struct WenxinAdapter;

#[derive(Debug, Serialize)]
struct WenxinMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WenxinResponse {
    result: String,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
    usage: Option<WenxinUsage>,
}

#[derive(Debug, Deserialize)]
struct WenxinUsage {
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

#[async_trait]
impl ProviderAdapter for WenxinAdapter {
    fn platform_id(&self) -> &str {
        "wenxin"
    }

    fn platform_name(&self) -> &str {
        "Baidu Wenxin"
    }

    async fn validate_credentials(
        &self,
        credentials: &str,
        proxy: Option<&ProxyOptions>,
    ) -> Result<ValidateCredentialsResult, ProviderError> {
        let status = self.get_service_status(credentials, proxy).await?;
        Ok(ValidateCredentialsResult {
            is_valid: status.is_healthy,
            error_message: status.error_message,
            details: None,
        })
    }

    async fn get_service_status(
        &self,
        credentials: &str,
        proxy: Option<&ProxyOptions>,
    ) -> Result<ServiceStatus, ProviderError> {
        let client = build_http_client(30, proxy)?;
        let started = std::time::Instant::now();

        let body = serde_json::json!({
            "messages": [{"role": "user", "content": "ping"}],
        });

        let resp = client
            .post(format!("{BASE_URL}/completions_pro?access_token={credentials}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response_time_ms = started.elapsed().as_millis() as u64;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Ok(ServiceStatus {
                is_healthy: false,
                status: ServiceHealth::Error,
                response_time_ms,
                error_message: Some(text),
                last_checked: chrono::Utc::now(),
            });
        }

        let parsed: Result<WenxinResponse, _> = serde_json::from_str(&text);
        let healthy = matches!(&parsed, Ok(r) if r.error_code.is_none());
        Ok(ServiceStatus {
            is_healthy: healthy,
            status: if healthy { ServiceHealth::Active } else { ServiceHealth::Error },
            response_time_ms,
            error_message: parsed.ok().and_then(|r| r.error_msg),
            last_checked: chrono::Utc::now(),
        })
    }

    async fn get_available_models(
        &self,
        _credentials: &str,
        _proxy: Option<&ProxyOptions>,
    ) -> Result<Vec<ModelInfo>, ProviderError> {
        Ok(vec![ModelInfo {
            id: "completions_pro".into(),
            name: "ERNIE 4.0".into(),
            description: None,
            context_length: None,
            input_price: None,
            output_price: None,
            is_available: true,
        }])
    }

    fn format_error(&self, raw: &ProviderError) -> String {
        format!("Wenxin error: {raw}")
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

        let messages: Vec<WenxinMessage> = request
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| WenxinMessage { role: m.role.clone(), content: m.content.clone() })
            .collect();

        let endpoint = request.model.clone().unwrap_or_else(|| "completions_pro".into());
        let resp = client
            .post(format!("{BASE_URL}/{endpoint}?access_token={credentials}"))
            .json(&serde_json::json!({ "messages": messages }))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| ProviderError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(ProviderError::ServiceUnavailable(text));
        }

        let parsed: WenxinResponse = serde_json::from_str(&text).map_err(|e| ProviderError::Adapter {
            code: "invalid_response".into(),
            status_code: Some(status.as_u16()),
            message: e.to_string(),
        })?;

        if let Some(code) = parsed.error_code {
            return Err(ProviderError::Adapter {
                code: code.to_string(),
                status_code: Some(status.as_u16()),
                message: parsed.error_msg.unwrap_or_default(),
            });
        }

        let usage = parsed.usage.unwrap_or(WenxinUsage { prompt_tokens: 0, completion_tokens: 0 });

        Ok(AiResponse {
            content: parsed.result,
            model: endpoint,
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
