//! Upstream account — credentials to a provider; the unit the router
//! chooses between (spec §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    Http,
    Socks5,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountTotals {
    pub requests: u64,
    pub tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamAccount {
    pub id: String,
    pub name: String,
    pub provider_id: String,
    pub encrypted_credentials: aicarpool_security::EncryptedValue,
    pub proxy: Option<ProxyConfig>,
    pub supported_models: Vec<String>,
    pub cost_per_token: f64,
    /// 0-100, a hint rather than a hard bound (spec §3).
    pub current_load: f64,
    pub status: AccountStatus,
    pub totals: AccountTotals,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl UpstreamAccount {
    pub fn is_usable(&self) -> bool {
        matches!(self.status, AccountStatus::Active)
    }

    /// Age since last dispatch, used by the pool score and the router's
    /// load-decrement recomputation on restart (SPEC_FULL.md D.3).
    pub fn last_used_age_minutes(&self, now: chrono::DateTime<chrono::Utc>) -> f64 {
        match self.last_used_at {
            Some(t) => (now - t).num_seconds().max(0) as f64 / 60.0,
            None => f64::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_account_is_not_usable() {
        let acc = UpstreamAccount {
            id: "a1".into(),
            name: "acct".into(),
            provider_id: "claude".into(),
            encrypted_credentials: aicarpool_security::EncryptedValue {
                nonce: vec![0; 12],
                ciphertext: vec![],
            },
            proxy: None,
            supported_models: vec![],
            cost_per_token: 0.0,
            current_load: 0.0,
            status: AccountStatus::Inactive,
            totals: AccountTotals::default(),
            last_used_at: None,
        };
        assert!(!acc.is_usable());
    }

    #[test]
    fn never_used_account_has_max_age() {
        let acc = UpstreamAccount {
            id: "a1".into(),
            name: "acct".into(),
            provider_id: "claude".into(),
            encrypted_credentials: aicarpool_security::EncryptedValue {
                nonce: vec![0; 12],
                ciphertext: vec![],
            },
            proxy: None,
            supported_models: vec![],
            cost_per_token: 0.0,
            current_load: 0.0,
            status: AccountStatus::Active,
            totals: AccountTotals::default(),
            last_used_at: None,
        };
        assert_eq!(acc.last_used_age_minutes(chrono::Utc::now()), f64::MAX);
    }
}
