//! Client API key — the unit of admission control (spec §3, §4.1).
//!
//! `KeyMetadata` is the discriminated schema spec.md §9 calls for in place
//! of an `any`-typed metadata blob; it serializes to the store's JSON
//! column unchanged.

use crate::binding::BindingMode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Inactive,
    Deleted,
}

impl KeyStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, KeyStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_minutes: u32,
    pub max_requests: u64,
    pub max_tokens: u64,
}

/// `all` permits any provider; otherwise membership is checked against the
/// explicit set (spec.md §4.1, §9 open question 3: strict, not substring).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServicePermissions {
    All(AllMarker),
    Providers(HashSet<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllMarker {
    #[serde(rename = "all")]
    All,
}

impl ServicePermissions {
    pub fn all() -> Self {
        ServicePermissions::All(AllMarker::All)
    }

    pub fn of(providers: impl IntoIterator<Item = String>) -> Self {
        ServicePermissions::Providers(providers.into_iter().collect())
    }

    /// Strict set-membership check, not substring matching — see
    /// SPEC_FULL.md D.4 for why substring matching was rejected here.
    pub fn permits(&self, provider_id: &str) -> bool {
        match self {
            ServicePermissions::All(_) => true,
            ServicePermissions::Providers(set) => set
                .iter()
                .any(|p| p.eq_ignore_ascii_case(provider_id)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub rate_limit: Option<RateLimitConfig>,
    pub service_permissions: ServicePermissions,
    pub resource_binding: BindingMode,
    pub daily_cost_limit: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientApiKey {
    pub id: String,
    /// Secret; never logged or returned beyond its prefix.
    pub key_value: String,
    pub group_id: String,
    pub user_id: String,
    pub status: KeyStatus,
    pub quota_limit: Option<u64>,
    pub quota_used: u64,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub metadata: KeyMetadata,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ClientApiKey {
    /// First 8 characters, safe to log.
    pub fn redacted_prefix(&self) -> String {
        self.key_value.chars().take(8).collect()
    }

    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    pub fn quota_exceeded(&self) -> bool {
        match self.quota_limit {
            Some(limit) => self.quota_used >= limit,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_meta() -> KeyMetadata {
        KeyMetadata {
            rate_limit: None,
            service_permissions: ServicePermissions::of(["claude".to_string()]),
            resource_binding: BindingMode::Shared,
            daily_cost_limit: None,
        }
    }

    #[test]
    fn permits_is_strict_not_substring() {
        let perms = ServicePermissions::of(["cla".to_string()]);
        assert!(!perms.permits("claude"));
        assert!(perms.permits("cla"));
    }

    #[test]
    fn all_marker_permits_everything() {
        assert!(ServicePermissions::all().permits("anything"));
    }

    #[test]
    fn quota_exceeded_respects_null_limit() {
        let mut key = ClientApiKey {
            id: "k1".into(),
            key_value: "sk-abc".into(),
            group_id: "g1".into(),
            user_id: "u1".into(),
            status: KeyStatus::Active,
            quota_limit: None,
            quota_used: 1_000_000,
            expires_at: None,
            metadata: key_meta(),
            last_used_at: None,
        };
        assert!(!key.quota_exceeded());
        key.quota_limit = Some(500);
        assert!(key.quota_exceeded());
    }

    #[test]
    fn redacted_prefix_never_reveals_full_key() {
        let key = ClientApiKey {
            id: "k1".into(),
            key_value: "sk-abcdefghijklmnop".into(),
            group_id: "g1".into(),
            user_id: "u1".into(),
            status: KeyStatus::Active,
            quota_limit: None,
            quota_used: 0,
            expires_at: None,
            metadata: key_meta(),
            last_used_at: None,
        };
        assert_eq!(key.redacted_prefix(), "sk-abcde");
        assert_ne!(key.redacted_prefix(), key.key_value);
    }
}
