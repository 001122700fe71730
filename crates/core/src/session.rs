//! Validated session and the request/response wire types used between
//! the router and provider adapters (spec §4.1, §4.2, §4.3).

use crate::key::ServicePermissions;
use serde::{Deserialize, Serialize};

/// Returned by the validator's performance record (§4.1 step 7) and by
/// the router's dispatch (§4.2 step 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub validation_time_ms: u64,
    pub cache_hit: bool,
    pub db_queries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub api_key_id: String,
    pub group_id: String,
    pub user_id: String,
    pub remaining_quota: Option<u64>,
    pub requests_remaining: Option<u64>,
    pub tokens_remaining: Option<u64>,
    pub reset_time: Option<chrono::DateTime<chrono::Utc>>,
    pub service_permissions: ServicePermissions,
    pub performance: PerformanceRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRequest {
    pub messages: Vec<ChatMessage>,
    pub provider_id: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

impl AiRequest {
    /// Default provider when the caller leaves it unspecified (spec §4.2
    /// step 1).
    pub fn provider_or_default(&self) -> &str {
        self.provider_id.as_deref().unwrap_or("claude")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountUsed {
    pub id: String,
    pub provider_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePerformance {
    pub execution_time_ms: u64,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,
    pub model: String,
    pub request_tokens: u64,
    pub response_tokens: u64,
    pub account_used: AccountUsed,
    pub performance: ResponsePerformance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_defaults_to_claude() {
        let req = AiRequest {
            messages: vec![],
            provider_id: None,
            model: None,
            max_tokens: None,
            temperature: None,
            stream: false,
        };
        assert_eq!(req.provider_or_default(), "claude");
    }

    #[test]
    fn explicit_provider_is_respected() {
        let req = AiRequest {
            messages: vec![],
            provider_id: Some("openai".into()),
            model: None,
            max_tokens: None,
            temperature: None,
            stream: false,
        };
        assert_eq!(req.provider_or_default(), "openai");
    }
}
