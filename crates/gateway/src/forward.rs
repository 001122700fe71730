//! The public forwarding endpoint (spec §6): a provider-compatible
//! chat request, authenticated by the client's own API key value as a
//! bearer token, dispatched through the router.

use crate::state::GatewayState;
use aicarpool_core::{AiRequest, AiResponse, QuotaKind, RateLimitKind, Rejection, UpstreamCategory};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::Instrument;

#[derive(Debug, Serialize)]
struct FailureBody {
    success: bool,
    code: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Maps a [`Rejection`] to its documented HTTP status and machine code
/// (spec §6, §7).
fn rejection_response(rejection: Rejection) -> Response {
    let (status, code, reset_time) = match &rejection {
        Rejection::NotFound => (StatusCode::UNAUTHORIZED, "not_found", None),
        Rejection::Disabled => (StatusCode::UNAUTHORIZED, "disabled", None),
        Rejection::Expired => (StatusCode::FORBIDDEN, "expired", None),
        Rejection::GroupUnavailable => (StatusCode::FORBIDDEN, "group_unavailable", None),
        Rejection::QuotaExceeded { kind, .. } => (
            StatusCode::PAYMENT_REQUIRED,
            match kind {
                QuotaKind::Daily => "quota_exceeded_daily",
                QuotaKind::Tokens => "quota_exceeded_tokens",
            },
            None,
        ),
        Rejection::RateLimited { kind, reset_time } => (
            StatusCode::TOO_MANY_REQUESTS,
            match kind {
                RateLimitKind::Requests => "rate_limited_requests",
                RateLimitKind::Tokens => "rate_limited_tokens",
            },
            Some(*reset_time),
        ),
        Rejection::PermissionDenied { .. } => (StatusCode::FORBIDDEN, "permission_denied", None),
        Rejection::NoAccount => (StatusCode::SERVICE_UNAVAILABLE, "no_account", None),
        Rejection::UpstreamError { category } => (
            StatusCode::BAD_GATEWAY,
            match category {
                UpstreamCategory::RateLimited => "upstream_rate_limit",
                UpstreamCategory::ServerError => "upstream_server_error",
                UpstreamCategory::Network => "upstream_network",
                UpstreamCategory::Generic => "upstream_error",
            },
            None,
        ),
        Rejection::CacheUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "cache_unavailable", None),
    };

    let body = FailureBody { success: false, code, error: rejection.to_string(), reset_time };
    (status, Json(body)).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn gateway_headers(response: &AiResponse, session: &aicarpool_core::Session) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&response.account_used.id) {
        headers.insert("X-Gateway-Account", v);
    }
    if let Some(remaining) = session.remaining_quota {
        if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
            headers.insert("X-Gateway-Remaining-Quota", v);
        }
    }
    if let Some(reset) = session.reset_time {
        if let Ok(v) = HeaderValue::from_str(&reset.to_rfc3339()) {
            headers.insert("X-Gateway-Rate-Reset", v);
        }
    }
    headers
}

/// `POST /v1/chat` (and provider-compatible aliases mounted at the same
/// handler): validate the bearer token as a client `keyValue`, then
/// dispatch the request through the router. Every call gets a
/// `request_id` attached to its tracing span so a single log grep
/// reconstructs the validator -> router -> adapter -> queue path.
pub async fn forward_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(request): Json<AiRequest>,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("forward_request", %request_id);

    async move {
        let Some(key_value) = bearer_token(&headers) else {
            return rejection_response(Rejection::NotFound);
        };

        let session = match state.validator.validate(key_value).await {
            Ok(session) => session,
            Err(rejection) => return rejection_response(rejection),
        };

        let outcome = state
            .router
            .dispatch(
                &session.group_id,
                &session.api_key_id,
                &session.user_id,
                &session.service_permissions,
                &request,
            )
            .await;

        match outcome {
            Ok(response) => {
                let mut headers = gateway_headers(&response, &session);
                if let Ok(v) = HeaderValue::from_str(&request_id.to_string()) {
                    headers.insert("X-Request-Id", v);
                }
                (headers, Json(response)).into_response()
            }
            Err(rejection) => rejection_response(rejection),
        }
    }
    .instrument(span)
    .await
}
