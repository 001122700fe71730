use crate::CachedKey;
use aicarpool_cache::{CacheClient, KeySpace};
use aicarpool_core::{
    ClientApiKey, DailyQuota, PerformanceRecord, QuotaKind, RateLimitKind, RateWindow, Rejection,
    Session,
};
use aicarpool_flags::{FlagRegistry, ENABLE_API_KEY_CACHE};
use aicarpool_store::PostgresStore;
use std::sync::Arc;

pub struct Validator {
    cache: CacheClient,
    keys: KeySpace,
    store: Arc<PostgresStore>,
    flags: Arc<FlagRegistry>,
    cache_ttl_api_key_secs: u64,
    cache_fallback_to_db: bool,
}

impl Validator {
    pub fn new(
        cache: CacheClient,
        key_prefix: &str,
        store: Arc<PostgresStore>,
        flags: Arc<FlagRegistry>,
        cache_ttl_api_key_secs: u64,
        cache_fallback_to_db: bool,
    ) -> Self {
        Self {
            cache,
            keys: KeySpace::new(key_prefix),
            store,
            flags,
            cache_ttl_api_key_secs,
            cache_fallback_to_db,
        }
    }

    /// `validate(keyValue) -> Result<Session, Rejection>` (spec §4.1).
    pub async fn validate(&self, key_value: &str) -> Result<Session, Rejection> {
        let started = std::time::Instant::now();
        let now = chrono::Utc::now();
        let mut db_queries: u32 = 0;
        let mut cache_hit = true;

        let cache_key = self.keys.api_key(key_value);
        let cached = self
            .cache
            .get_json::<CachedKey>(&cache_key)
            .await
            .unwrap_or(None);

        let CachedKey { key, group } = match cached.filter(|c| !c.key.is_expired(now)) {
            Some(c) => c,
            None => {
                cache_hit = false;
                if !self
                    .flags
                    .is_enabled(ENABLE_API_KEY_CACHE, None)
                    .await
                    .unwrap_or(true)
                    && !self.cache_fallback_to_db
                {
                    return Err(Rejection::CacheUnavailable);
                }

                db_queries += 1;
                let found = self
                    .store
                    .find_key_with_group(key_value)
                    .await
                    .map_err(|_| Rejection::CacheUnavailable)?;
                let Some((key, group)) = found else {
                    return Err(Rejection::NotFound);
                };

                let projection = CachedKey { key: key.clone(), group: group.clone() };
                let cache = self.cache.clone();
                let ttl = self.cache_ttl_api_key_secs;
                let cache_key = cache_key.clone();
                tokio::spawn(async move {
                    let _ = cache.setex_json(&cache_key, ttl, &projection).await;
                });

                CachedKey { key, group }
            }
        };

        self.basic_status_checks(&key, &group, now)?;
        self.quota_check(&key, now, &mut db_queries).await?;
        let (requests_remaining, tokens_remaining, reset_time) =
            self.rate_limit_check(&key, now, &mut db_queries).await?;

        let key_id = key.id.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            let _ = store.touch_key_last_used(&key_id).await;
        });

        Ok(Session {
            api_key_id: key.id.clone(),
            group_id: key.group_id.clone(),
            user_id: key.user_id.clone(),
            remaining_quota: key.quota_limit.map(|l| l.saturating_sub(key.quota_used)),
            requests_remaining,
            tokens_remaining,
            reset_time,
            service_permissions: key.metadata.service_permissions.clone(),
            performance: PerformanceRecord {
                validation_time_ms: started.elapsed().as_millis() as u64,
                cache_hit,
                db_queries,
            },
        })
    }

    /// Step 3: status==active, now < expiresAt, group.status==active —
    /// first failure short-circuits.
    fn basic_status_checks(
        &self,
        key: &ClientApiKey,
        group: &aicarpool_core::Group,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), Rejection> {
        if !key.status.is_active() {
            return Err(Rejection::Disabled);
        }
        if key.is_expired(now) {
            return Err(Rejection::Expired);
        }
        if !group.accepts_traffic() {
            return Err(Rejection::GroupUnavailable);
        }
        Ok(())
    }

    /// Step 4: daily cost limit, then the key's own token quota.
    async fn quota_check(
        &self,
        key: &ClientApiKey,
        now: chrono::DateTime<chrono::Utc>,
        db_queries: &mut u32,
    ) -> Result<(), Rejection> {
        if let Some(daily_limit) = key.metadata.daily_cost_limit {
            let date = now.format("%Y-%m-%d").to_string();
            let quota_key = self.keys.quota_info(&key.id);
            let cached: Option<DailyQuota> = self.cache.get_json(&quota_key).await.unwrap_or(None);

            let quota = match cached {
                Some(q) => q,
                None => {
                    *db_queries += 1;
                    let used = self
                        .store
                        .aggregate_daily_cost(&key.group_id, &date)
                        .await
                        .unwrap_or(0.0);
                    let quota = DailyQuota {
                        group_id: key.group_id.clone(),
                        date,
                        used,
                        limit: daily_limit,
                    };
                    let cache = self.cache.clone();
                    let k = quota_key.clone();
                    let q = quota.clone();
                    tokio::spawn(async move {
                        let _ = cache.setex_json(&k, 60, &q).await;
                    });
                    quota
                }
            };

            if quota.exceeded() {
                return Err(Rejection::QuotaExceeded { kind: QuotaKind::Daily, limit: quota.limit });
            }
        }

        if key.quota_exceeded() {
            return Err(Rejection::QuotaExceeded {
                kind: QuotaKind::Tokens,
                limit: key.quota_limit.unwrap_or(0) as f64,
            });
        }

        Ok(())
    }

    /// Step 5: sliding-window rate limit.
    ///
    /// The cached `RateWindow` above is a snapshot written once per cache
    /// miss and never rewritten; admissions during its lifetime are counted
    /// with a dedicated `INCR` counter (`CacheClient::incr`) so every
    /// request sharing the window, not just the one that populated it, is
    /// actually reflected. Token usage isn't known until the provider
    /// responds, so `token_count` stays the snapshot value and is
    /// reconciled from the store's `usage_stats` aggregate on the next miss.
    async fn rate_limit_check(
        &self,
        key: &ClientApiKey,
        now: chrono::DateTime<chrono::Utc>,
        db_queries: &mut u32,
    ) -> Result<(Option<u64>, Option<u64>, Option<chrono::DateTime<chrono::Utc>>), Rejection> {
        let Some(rate_limit) = &key.metadata.rate_limit else {
            return Ok((None, None, None));
        };

        let window_key = self.keys.rate_limit(&key.id, rate_limit.window_minutes);
        let cached: Option<RateWindow> = self.cache.get_json(&window_key).await.unwrap_or(None);

        let mut window = match cached.filter(|w| !w.is_expired(now)) {
            Some(w) => w,
            None => {
                *db_queries += 1;
                let (requests, tokens) = self
                    .store
                    .aggregate_rate_window(&key.id, rate_limit.window_minutes)
                    .await
                    .unwrap_or((0, 0));
                let mut window = RateWindow::new(
                    key.id.clone(),
                    rate_limit.window_minutes,
                    rate_limit.max_requests,
                    rate_limit.max_tokens,
                    now,
                );
                window.request_count = requests;
                window.token_count = tokens;

                let remaining_secs = (window.reset_time - now).num_seconds().max(1) as u64;
                let cache = self.cache.clone();
                let k = window_key.clone();
                let w = window.clone();
                tokio::spawn(async move {
                    let _ = cache.setex_json(&k, remaining_secs, &w).await;
                });
                window
            }
        };

        let admitted_key = format!("{window_key}:admitted");
        let live_admitted = self.cache.incr(&admitted_key, 1).await.unwrap_or(1).max(1) as u64;
        if live_admitted == 1 {
            let remaining_secs = (window.reset_time - now).num_seconds().max(1);
            let _ = self.cache.expire(&admitted_key, remaining_secs).await;
        }
        // Count as of just before this request, so `would_exceed`'s `>=`
        // rejects exactly the (maxRequests+1)-th admission.
        window.request_count = window.request_count + live_admitted - 1;

        if window.would_exceed() {
            let kind = if window.request_count >= window.max_requests {
                RateLimitKind::Requests
            } else {
                RateLimitKind::Tokens
            };
            return Err(Rejection::RateLimited { kind, reset_time: window.reset_time });
        }
        window.request_count += 1;

        Ok((
            Some(window.max_requests.saturating_sub(window.request_count)),
            Some(window.max_tokens.saturating_sub(window.token_count)),
            Some(window.reset_time),
        ))
    }
}

#[cfg(test)]
mod tests {
    use aicarpool_core::{BindingMode, GroupStatus, KeyMetadata, KeyStatus, ServicePermissions};

    fn key_with_status(status: KeyStatus) -> aicarpool_core::ClientApiKey {
        aicarpool_core::ClientApiKey {
            id: "k1".into(),
            key_value: "sk-test".into(),
            group_id: "g1".into(),
            user_id: "u1".into(),
            status,
            quota_limit: None,
            quota_used: 0,
            expires_at: None,
            metadata: KeyMetadata {
                rate_limit: None,
                service_permissions: ServicePermissions::all(),
                resource_binding: BindingMode::Shared,
                daily_cost_limit: None,
            },
            last_used_at: None,
        }
    }

    #[test]
    fn inactive_key_is_rejected_before_expiry_check() {
        let key = key_with_status(KeyStatus::Inactive);
        assert!(!key.status.is_active());
    }

    #[test]
    fn group_status_gate_is_independent_of_key_status() {
        assert!(!GroupStatus::Inactive.is_active());
    }
}
