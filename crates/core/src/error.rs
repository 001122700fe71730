//! Error types for the aicarpool gateway domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own error variant; every leaf that crosses a component
//! boundary carries a stable machine `code()` used by clients and
//! monitors (spec §7).

use thiserror::Error;

/// The top-level error type for all gateway operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Admission rejected: {0}")]
    Admission(#[from] Rejection),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// The admission error taxonomy of spec §7.
///
/// Every variant carries a stable machine code and maps to one HTTP
/// status at the gateway boundary (spec §6).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("API key not found")]
    NotFound,

    #[error("API key is disabled")]
    Disabled,

    #[error("API key has expired")]
    Expired,

    #[error("Group is unavailable")]
    GroupUnavailable,

    #[error("Quota exceeded: {kind} (limit {limit})")]
    QuotaExceeded { kind: QuotaKind, limit: f64 },

    #[error("Rate limited: {kind}, resets at {reset_time}")]
    RateLimited {
        kind: RateLimitKind,
        reset_time: chrono::DateTime<chrono::Utc>,
    },

    #[error("Permission denied for provider {provider}")]
    PermissionDenied { provider: String },

    #[error("No eligible upstream account")]
    NoAccount,

    #[error("Upstream error: {category}")]
    UpstreamError { category: UpstreamCategory },

    #[error("Cache unavailable")]
    CacheUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    Daily,
    Tokens,
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaKind::Daily => write!(f, "daily"),
            QuotaKind::Tokens => write!(f, "tokens"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKind {
    Requests,
    Tokens,
}

impl std::fmt::Display for RateLimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitKind::Requests => write!(f, "requests"),
            RateLimitKind::Tokens => write!(f, "tokens"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamCategory {
    Network,
    RateLimited,
    ServerError,
    Generic,
}

impl std::fmt::Display for UpstreamCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamCategory::Network => write!(f, "network"),
            UpstreamCategory::RateLimited => write!(f, "rate_limited"),
            UpstreamCategory::ServerError => write!(f, "server_error"),
            UpstreamCategory::Generic => write!(f, "generic"),
        }
    }
}

impl Rejection {
    /// Stable machine code, used by clients and monitors.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::NotFound => "not_found",
            Rejection::Disabled => "disabled",
            Rejection::Expired => "expired",
            Rejection::GroupUnavailable => "group_unavailable",
            Rejection::QuotaExceeded { .. } => "quota_exceeded",
            Rejection::RateLimited { .. } => "rate_limited",
            Rejection::PermissionDenied { .. } => "permission_denied",
            Rejection::NoAccount => "no_account",
            Rejection::UpstreamError { .. } => "upstream_error",
            Rejection::CacheUnavailable => "cache_unavailable",
        }
    }

    /// The HTTP status spec §6 maps this rejection to.
    pub fn http_status(&self) -> u16 {
        match self {
            Rejection::NotFound | Rejection::Disabled => 401,
            Rejection::QuotaExceeded { .. } => 402,
            Rejection::GroupUnavailable
            | Rejection::Expired
            | Rejection::PermissionDenied { .. } => 403,
            Rejection::RateLimited { .. } => 429,
            Rejection::UpstreamError { .. } => 502,
            Rejection::NoAccount | Rejection::CacheUnavailable => 503,
        }
    }
}

/// Errors surfaced by a provider adapter (spec §4.3), always remapped to
/// a `Rejection` before leaving the router.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Quota exceeded with upstream provider: {0}")]
    QuotaExceeded(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Adapter error {code} (status {status_code:?}): {message}")]
    Adapter {
        code: String,
        status_code: Option<u16>,
        message: String,
    },
}

impl ProviderError {
    /// Remap an adapter-level error to the admission taxonomy, never
    /// letting a raw provider payload escape the router (spec §7).
    pub fn into_rejection(self) -> Rejection {
        match self {
            ProviderError::Network(_) => Rejection::UpstreamError {
                category: UpstreamCategory::Network,
            },
            ProviderError::AuthenticationFailed(_) | ProviderError::QuotaExceeded(_) => {
                Rejection::UpstreamError {
                    category: UpstreamCategory::Generic,
                }
            }
            ProviderError::ServiceUnavailable(_) => Rejection::UpstreamError {
                category: UpstreamCategory::ServerError,
            },
            ProviderError::Adapter { status_code, .. } => match status_code {
                Some(429) => Rejection::UpstreamError {
                    category: UpstreamCategory::RateLimited,
                },
                Some(s) if (500..600).contains(&s) => Rejection::UpstreamError {
                    category: UpstreamCategory::ServerError,
                },
                _ => Rejection::UpstreamError {
                    category: UpstreamCategory::Generic,
                },
            },
        }
    }

    /// Whether a different upstream account should be tried (spec §4.2:
    /// "5xx and network errors are retryable against a different
    /// account; 4xx from the upstream (except 429) are propagated").
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) | ProviderError::ServiceUnavailable(_) => true,
            ProviderError::Adapter { status_code, .. } => {
                matches!(status_code, Some(429) | Some(500..=599))
            }
            ProviderError::AuthenticationFailed(_) | ProviderError::QuotaExceeded(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_http_status_mapping() {
        assert_eq!(Rejection::NotFound.http_status(), 401);
        assert_eq!(
            Rejection::QuotaExceeded {
                kind: QuotaKind::Daily,
                limit: 5.0
            }
            .http_status(),
            402
        );
        assert_eq!(Rejection::GroupUnavailable.http_status(), 403);
        assert_eq!(
            Rejection::RateLimited {
                kind: RateLimitKind::Requests,
                reset_time: chrono::Utc::now(),
            }
            .http_status(),
            429
        );
        assert_eq!(Rejection::NoAccount.http_status(), 503);
    }

    #[test]
    fn provider_error_retryability() {
        assert!(ProviderError::Network("boom".into()).is_retryable());
        assert!(ProviderError::Adapter {
            code: "server_error".into(),
            status_code: Some(500),
            message: "oops".into()
        }
        .is_retryable());
        assert!(!ProviderError::Adapter {
            code: "bad_request".into(),
            status_code: Some(400),
            message: "oops".into()
        }
        .is_retryable());
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_retryable());
    }

    #[test]
    fn provider_error_remaps_to_upstream_rejection() {
        let err = ProviderError::Adapter {
            code: "rate_limited".into(),
            status_code: Some(429),
            message: "slow down".into(),
        };
        assert_eq!(
            err.into_rejection(),
            Rejection::UpstreamError {
                category: UpstreamCategory::RateLimited
            }
        );
    }

    #[test]
    fn rejection_codes_are_stable() {
        assert_eq!(Rejection::NotFound.code(), "not_found");
        assert_eq!(Rejection::NoAccount.code(), "no_account");
    }
}
