//! The ordered request pipeline (§4): authenticate, gate, and forward one
//! request, composing every other crate in this workspace into a single
//! `handle()` call. Stage order and short-circuit behavior follow §4.2
//! through §4.10; fail-open posture for stage-internal errors follows §7.

use chrono::Utc;
use gateway_abuse::{AbuseCheckResult, AbuseDetector};
use gateway_bloom::NegativeCacheManager;
use gateway_cache::{CacheEngine, CacheEntry, CacheError, CacheKeyBuilder, CacheStatus};
use gateway_circuitbreaker::CircuitBreaker;
use gateway_config::models::{ApiKeyStatus, CachePolicy, Route};
use gateway_config::ConfigReader;
use gateway_core::GatewayError;
use gateway_quota::{QuotaDecision, QuotaManager};
use gateway_ratelimit::{RateLimitDecision, RateLimiter, RateLimiterConfig};
use gateway_store::Store;
use gateway_upstream::{UpstreamClient, UpstreamError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::{log_degraded, IntoGatewayError};
use crate::log::{CacheStatusTag, RequestLogRecord};
use crate::registry::CircuitBreakerRegistry;
use crate::request::{PipelineRequest, PipelineResponse};

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Governs what a fetch closure reports back out-of-band, since
/// `CacheEngine::get_or_fetch`'s `Result<CacheEntry, CacheError>` contract
/// can't carry upstream-specific metadata or a typed transport error.
enum UpstreamOutcome {
    Success {
        latency_ms: u64,
        status_code: u16,
        response_size: usize,
    },
    CircuitOpen,
    Transport(UpstreamError),
}

/// Composes auth, abuse detection, rate limiting, quota accounting, the
/// negative cache, the response cache, and upstream forwarding into the
/// single ordered flow described in §4.
pub struct GatewayPipeline {
    config: Arc<dyn ConfigReader>,
    rate_limiter: RateLimiter,
    default_rate: f64,
    default_burst: u32,
    quota: QuotaManager,
    negative_cache: Arc<NegativeCacheManager>,
    abuse: AbuseDetector,
    cache: CacheEngine,
    upstream: Arc<UpstreamClient>,
    circuits: CircuitBreakerRegistry,
}

impl GatewayPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<dyn ConfigReader>,
        store: Arc<dyn Store>,
        rate_limiter_config: RateLimiterConfig,
        default_rate: f64,
        default_burst: u32,
        abuse: AbuseDetector,
        negative_cache_expected_items: u64,
        negative_cache_fp_rate: f64,
        circuit_breaker_config: gateway_circuitbreaker::CircuitBreakerConfig,
        upstream: UpstreamClient,
    ) -> Self {
        Self {
            config,
            rate_limiter: RateLimiter::new(store.clone(), rate_limiter_config),
            default_rate,
            default_burst,
            quota: QuotaManager::new(store.clone()),
            negative_cache: Arc::new(NegativeCacheManager::new(
                store.clone(),
                negative_cache_expected_items,
                negative_cache_fp_rate,
            )),
            abuse,
            cache: CacheEngine::new(store.clone()),
            upstream: Arc::new(upstream),
            circuits: CircuitBreakerRegistry::new(store, circuit_breaker_config),
        }
    }

    /// Runs the full pipeline for one request and returns both the result
    /// and the single log record this request produces, emitted exactly
    /// once regardless of which stage it stopped at (§4.10).
    pub async fn handle(&self, req: PipelineRequest) -> (Result<PipelineResponse, GatewayError>, RequestLogRecord) {
        let started = Instant::now();
        let mut log = RequestLogRecord::new(
            req.request_id.clone(),
            req.method.clone(),
            req.route_name.clone(),
            req.path.clone(),
            req.client_ip.clone(),
            req.user_agent.clone(),
        );

        let result = self.run(&req, &mut log).await;

        log.latency_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => log.status_code = response.status_code,
            Err(err) => {
                log.status_code = err.status();
                log.error_type = Some(err.tag());
            }
        }
        log.emit();
        (result, log)
    }

    async fn run(&self, req: &PipelineRequest, log: &mut RequestLogRecord) -> Result<PipelineResponse, GatewayError> {
        let secret = req.api_key.as_deref().ok_or(GatewayError::MissingApiKey)?;

        let (api_key, tenant) = self
            .config
            .lookup_key(secret)
            .await
            .map_err(|e| e.into_gateway_error())?;
        log.api_key_id = Some(api_key.id);
        log.tenant_id = Some(tenant.id);

        let now = Utc::now();
        if api_key.status != ApiKeyStatus::Active {
            return Err(GatewayError::KeyInactive);
        }
        if api_key.expires_at.map(|expires_at| expires_at <= now).unwrap_or(false) {
            return Err(GatewayError::KeyExpired);
        }
        if !tenant.is_active {
            return Err(GatewayError::TenantInactive);
        }
        if let Some(block) = self.config.active_block(api_key.id).await {
            if block.is_active(now) {
                return Err(GatewayError::KeyBlocked);
            }
        }
        self.config.touch_last_used(api_key.id).await;

        let route = self
            .config
            .find_route(&req.route_name, &req.method, tenant.id)
            .await
            .map_err(|e| e.into_gateway_error())?;
        log.route_id = Some(route.id);

        let abuse_key = api_key.id.to_string();
        let abuse_result = match self.abuse.check_abuse(&abuse_key).await {
            Ok(result) => result,
            Err(err) => {
                log_degraded("abuse", err);
                clear_abuse_result()
            }
        };
        if abuse_result.is_blocked {
            return Err(GatewayError::Blocked {
                retry_after: block_retry_after(abuse_result.block_until),
            });
        }

        let rate = route.rate_limit_rps.or(api_key.rate_limit_rps).unwrap_or(self.default_rate);
        let burst = route.rate_limit_burst.or(api_key.rate_limit_burst).unwrap_or(self.default_burst);
        let effective_rate = rate * abuse_result.rate_multiplier;
        let effective_burst = ((burst as f64) * abuse_result.rate_multiplier).max(1.0) as u32;

        let rate_key = format!("key:{}", api_key.id);
        let rate_decision = match self
            .rate_limiter
            .check(&rate_key, Some(effective_rate), Some(effective_burst))
            .await
        {
            Ok(decision) => decision,
            Err(err) => {
                log_degraded("rate_limit", err);
                RateLimitDecision::allow(effective_burst as f64, Duration::from_secs(1))
            }
        };
        if !rate_decision.allowed {
            return Err(GatewayError::RateLimited {
                retry_after: rate_decision.retry_after.unwrap_or(Duration::from_secs(1)),
            });
        }

        let quota_decision = match self
            .quota
            .check_and_increment(api_key.id, api_key.quota_daily, api_key.quota_monthly)
            .await
        {
            Ok(decision) => decision,
            Err(err) => {
                log_degraded("quota", err);
                QuotaDecision { allowed: true, exceeded: None }
            }
        };
        if !quota_decision.allowed {
            let exceeded = quota_decision.exceeded.expect("a denied decision always names what it exceeded");
            return Err(GatewayError::QuotaExceeded { exceeded: exceeded.tag() });
        }

        match self.negative_cache.is_likely_404(&route.name, &req.path).await {
            Ok(true) => {
                log.cache_status = Some(CacheStatusTag::Hit);
                return Ok(not_found_response(&req.request_id.to_string(), &rate_decision, effective_burst));
            }
            Ok(false) => {}
            Err(err) => log_degraded("negative_cache", err),
        }

        let policy = match route.policy_id {
            Some(policy_id) => self.config.cache_policy(policy_id).await,
            None => CachePolicy::default(),
        };

        let result = if req.method == http::Method::GET && !policy.cache_no_store {
            self.handle_cacheable(req, log, &route, &policy, tenant.id, &rate_decision, effective_burst)
                .await
        } else {
            self.handle_bypass(req, log, &route, &rate_decision, effective_burst).await
        };

        // Feed C6 with the outcome of this request so its EWMA/z-score
        // tracking can trip a hard block or soft-limit on the *next*
        // request for this key (§4.6); the verdict returned here governs
        // that next request, not this one, so it's intentionally discarded.
        let is_error = match &result {
            Ok(response) => response.status_code >= 500,
            Err(_) => true,
        };
        if let Err(err) = self.abuse.record_request(&abuse_key, is_error).await {
            log_degraded("abuse", err);
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_cacheable(
        &self,
        req: &PipelineRequest,
        log: &mut RequestLogRecord,
        route: &Route,
        policy: &CachePolicy,
        tenant_id: gateway_config::TenantId,
        rate_decision: &RateLimitDecision,
        burst: u32,
    ) -> Result<PipelineResponse, GatewayError> {
        let vary_headers = extract_vary_headers(&req.headers, &policy.vary_headers);
        // Partition the cache key by tenant only when the policy marks the
        // response private; shared-cacheable responses stay one entry
        // across every tenant hitting the same route.
        let tenant_hint = policy.cache_private.then(|| tenant_id.to_string());
        let cache_key = CacheKeyBuilder::build(
            req.method.as_str(),
            &route.name,
            &req.path,
            &req.query_params,
            &vary_headers,
            tenant_hint.as_deref(),
        );

        let outcome: Arc<Mutex<Option<UpstreamOutcome>>> = Arc::new(Mutex::new(None));
        let vary_key = vary_headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join("|");

        let circuit = self.circuits.get(&route.upstream_base_url);
        let upstream = self.upstream.clone();
        let route_for_fetch = route.clone();
        let method = req.method.clone();
        let path = req.path.clone();
        let query = req.query.clone();
        let headers = req.headers.clone();
        let body = req.body.clone();
        let ttl_seconds = policy.ttl_seconds;
        let stale_seconds = policy.stale_seconds;
        let outcome_for_fetch = outcome.clone();

        let fetch_fn = move || {
            let circuit = circuit.clone();
            let upstream = upstream.clone();
            let route = route_for_fetch.clone();
            let method = method.clone();
            let path = path.clone();
            let query = query.clone();
            let headers = headers.clone();
            let body = body.clone();
            let vary_key = vary_key.clone();
            let outcome = outcome_for_fetch.clone();
            async move {
                match circuit.can_execute().await {
                    Ok(false) => {
                        *outcome.lock().unwrap() = Some(UpstreamOutcome::CircuitOpen);
                        return Err(CacheError::LeaderFailed("circuit breaker open".to_string()));
                    }
                    Err(err) => log_degraded("circuit_breaker", err),
                    Ok(true) => {}
                }

                match upstream
                    .forward(&route, &method, &path, query.as_deref(), &headers, body)
                    .await
                {
                    Ok(response) => {
                        if let Err(err) = circuit.record_success().await {
                            log_degraded("circuit_breaker", err);
                        }
                        *outcome.lock().unwrap() = Some(UpstreamOutcome::Success {
                            latency_ms: response.latency.as_millis() as u64,
                            status_code: response.status_code,
                            response_size: response.body.len(),
                        });
                        Ok(CacheEntry::new(
                            response.status_code,
                            response.headers,
                            response.body,
                            ttl_seconds,
                            stale_seconds,
                            vary_key,
                        ))
                    }
                    Err(err) => {
                        if let Err(cb_err) = circuit.record_failure().await {
                            log_degraded("circuit_breaker", cb_err);
                        }
                        let message = err.to_string();
                        *outcome.lock().unwrap() = Some(UpstreamOutcome::Transport(err));
                        Err(CacheError::LeaderFailed(message))
                    }
                }
            }
        };

        match self.cache.get_or_fetch(&cache_key, policy, fetch_fn).await {
            Ok((entry, status)) => {
                self.apply_upstream_outcome(log, &outcome);
                if let Some(UpstreamOutcome::Success { status_code, .. }) = outcome.lock().unwrap().take() {
                    if status_code == 404 {
                        let _ = self.negative_cache.record_404(&route.name, &req.path).await;
                    }
                }
                log.cache_status = Some(cache_status_tag(status));
                Ok(entry_to_response(&entry, status, &req.request_id.to_string(), rate_decision, burst))
            }
            Err(err) => {
                self.apply_upstream_outcome(log, &outcome);
                Err(self.resolve_fetch_failure(err, &outcome))
            }
        }
    }

    async fn handle_bypass(
        &self,
        req: &PipelineRequest,
        log: &mut RequestLogRecord,
        route: &Route,
        rate_decision: &RateLimitDecision,
        burst: u32,
    ) -> Result<PipelineResponse, GatewayError> {
        let breaker = self.circuits.get(&route.upstream_base_url);
        match breaker.can_execute().await {
            Ok(false) => return Err(GatewayError::UpstreamError),
            Err(err) => log_degraded("circuit_breaker", err),
            Ok(true) => {}
        }

        let response = self
            .upstream
            .forward(route, &req.method, &req.path, req.query.as_deref(), &req.headers, req.body.clone())
            .await;

        match response {
            Ok(upstream_response) => {
                if let Err(err) = breaker.record_success().await {
                    log_degraded("circuit_breaker", err);
                }
                log.upstream_latency_ms = Some(upstream_response.latency.as_millis() as u64);
                log.upstream_status = Some(upstream_response.status_code);
                log.response_size = Some(upstream_response.body.len());
                log.cache_status = Some(CacheStatusTag::Bypass);
                if upstream_response.status_code == 404 {
                    let _ = self.negative_cache.record_404(&route.name, &req.path).await;
                }
                let mut headers = upstream_response.headers;
                decorate_headers(&mut headers, &req.request_id.to_string(), rate_decision, burst);
                headers.push(("x-cache".to_string(), "BYPASS".to_string()));
                Ok(PipelineResponse {
                    status_code: upstream_response.status_code,
                    headers,
                    body: upstream_response.body,
                })
            }
            Err(err) => {
                if let Err(cb_err) = breaker.record_failure().await {
                    log_degraded("circuit_breaker", cb_err);
                }
                Err(err.into_gateway_error())
            }
        }
    }

    fn apply_upstream_outcome(&self, log: &mut RequestLogRecord, outcome: &Arc<Mutex<Option<UpstreamOutcome>>>) {
        if let Some(UpstreamOutcome::Success { latency_ms, status_code, response_size }) = &*outcome.lock().unwrap() {
            log.upstream_latency_ms = Some(*latency_ms);
            log.upstream_status = Some(*status_code);
            log.response_size = Some(*response_size);
        }
    }

    fn resolve_fetch_failure(&self, err: CacheError, outcome: &Arc<Mutex<Option<UpstreamOutcome>>>) -> GatewayError {
        match outcome.lock().unwrap().take() {
            Some(UpstreamOutcome::CircuitOpen) => GatewayError::UpstreamError,
            Some(UpstreamOutcome::Transport(transport_err)) => transport_err.into_gateway_error(),
            Some(UpstreamOutcome::Success { .. }) | None => {
                log_degraded("cache", err);
                GatewayError::internal("cache engine failed without a recorded upstream outcome")
            }
        }
    }
}

fn clear_abuse_result() -> AbuseCheckResult {
    AbuseCheckResult {
        is_blocked: false,
        is_soft_limited: false,
        rate_multiplier: 1.0,
        reason: None,
        anomaly_score: 0.0,
        block_until: None,
    }
}

fn block_retry_after(block_until: Option<f64>) -> Duration {
    match block_until {
        Some(until) => Duration::from_secs_f64((until - now_secs()).max(1.0)),
        None => Duration::from_secs(300),
    }
}

fn extract_vary_headers(headers: &[(String, String)], vary_names: &[String]) -> BTreeMap<String, String> {
    let mut vary = BTreeMap::new();
    for name in vary_names {
        let lower = name.to_lowercase();
        if let Some((_, value)) = headers.iter().find(|(k, _)| k.to_lowercase() == lower) {
            vary.insert(lower, value.clone());
        }
    }
    vary
}

fn cache_status_tag(status: CacheStatus) -> CacheStatusTag {
    match status {
        CacheStatus::Fresh => CacheStatusTag::Hit,
        CacheStatus::Stale => CacheStatusTag::Stale,
        CacheStatus::Miss => CacheStatusTag::Miss,
    }
}

fn decorate_headers(
    headers: &mut Vec<(String, String)>,
    request_id: &str,
    rate_decision: &RateLimitDecision,
    burst: u32,
) {
    headers.push(("x-request-id".to_string(), request_id.to_string()));
    headers.push(("x-ratelimit-limit".to_string(), burst.to_string()));
    headers.push(("x-ratelimit-remaining".to_string(), rate_decision.remaining.floor().max(0.0).to_string()));
    headers.push(("x-ratelimit-reset".to_string(), rate_decision.reset_after.as_secs().to_string()));
}

fn entry_to_response(
    entry: &CacheEntry,
    status: CacheStatus,
    request_id: &str,
    rate_decision: &RateLimitDecision,
    burst: u32,
) -> PipelineResponse {
    let mut headers = entry.headers.clone();
    decorate_headers(&mut headers, request_id, rate_decision, burst);
    headers.push(("x-cache".to_string(), cache_status_tag(status).as_str().to_string()));
    if status != CacheStatus::Miss {
        headers.push(("age".to_string(), entry.age_seconds().floor().max(0.0).to_string()));
    }
    PipelineResponse {
        status_code: entry.status_code,
        headers,
        body: entry.body.clone(),
    }
}

fn not_found_response(request_id: &str, rate_decision: &RateLimitDecision, burst: u32) -> PipelineResponse {
    let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
    decorate_headers(&mut headers, request_id, rate_decision, burst);
    headers.push(("x-cache".to_string(), "HIT".to_string()));
    PipelineResponse {
        status_code: 404,
        headers,
        body: br#"{"error":"not_found"}"#.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_abuse::AbuseDetectorConfig;
    use gateway_circuitbreaker::CircuitBreakerConfig;
    use gateway_config::{ApiKey, ApiKeyStatus as Status, StaticConfigReader, Tenant};
    use gateway_core::RequestId;
    use gateway_ratelimit::RateLimiterKind;
    use gateway_store::MemoryStore;
    use http::Method;
    use std::collections::HashSet;

    fn pipeline(config: Arc<dyn ConfigReader>, store: Arc<dyn Store>) -> GatewayPipeline {
        GatewayPipeline::new(
            config,
            store.clone(),
            RateLimiterConfig::builder(RateLimiterKind::TokenBucket)
                .name("test")
                .default_rate(100.0)
                .default_burst(200)
                .build(),
            100.0,
            200,
            AbuseDetector::new(store.clone(), AbuseDetectorConfig::builder().build()),
            1000,
            0.01,
            CircuitBreakerConfig::builder().build(),
            UpstreamClient::new(),
        )
    }

    fn request(route_name: &str, api_key: Option<&str>) -> PipelineRequest {
        PipelineRequest {
            request_id: RequestId::new(),
            method: Method::GET,
            route_name: route_name.to_string(),
            path: "/items/1".to_string(),
            query: None,
            query_params: BTreeMap::new(),
            headers: Vec::new(),
            api_key: api_key.map(|s| s.to_string()),
            client_ip: Some("127.0.0.1".to_string()),
            user_agent: None,
            body: None,
        }
    }

    #[tokio::test]
    async fn missing_api_key_is_rejected_before_any_lookup() {
        let config: Arc<dyn ConfigReader> = Arc::new(StaticConfigReader::new());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let pipeline = pipeline(config, store);

        let (result, log) = pipeline.handle(request("items", None)).await;
        assert_eq!(result.unwrap_err(), GatewayError::MissingApiKey);
        assert_eq!(log.error_type, Some("missing_api_key"));
    }

    #[tokio::test]
    async fn unknown_key_maps_to_invalid_api_key() {
        let config: Arc<dyn ConfigReader> = Arc::new(StaticConfigReader::new());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let pipeline = pipeline(config, store);

        let (result, _log) = pipeline.handle(request("items", Some("sk_unknown"))).await;
        assert_eq!(result.unwrap_err(), GatewayError::InvalidApiKey);
    }

    #[tokio::test]
    async fn inactive_tenant_blocks_an_otherwise_valid_key() {
        let reader = StaticConfigReader::new();
        reader.insert_tenant(Tenant { id: 1, name: "acme".to_string(), is_active: false });
        reader.insert_key(
            "sk_live",
            ApiKey {
                id: 1,
                tenant_id: 1,
                prefix: "sk_live".to_string(),
                status: Status::Active,
                quota_daily: 0,
                quota_monthly: 0,
                rate_limit_rps: None,
                rate_limit_burst: None,
                expires_at: None,
                last_used_at: None,
            },
        );
        let config: Arc<dyn ConfigReader> = Arc::new(reader);
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let pipeline = pipeline(config, store);

        let (result, _log) = pipeline.handle(request("items", Some("sk_live"))).await;
        assert_eq!(result.unwrap_err(), GatewayError::TenantInactive);
    }

    #[tokio::test]
    async fn unmatched_route_surfaces_route_not_found() {
        let reader = StaticConfigReader::new();
        reader.insert_tenant(Tenant { id: 1, name: "acme".to_string(), is_active: true });
        reader.insert_key(
            "sk_live",
            ApiKey {
                id: 1,
                tenant_id: 1,
                prefix: "sk_live".to_string(),
                status: Status::Active,
                quota_daily: 0,
                quota_monthly: 0,
                rate_limit_rps: None,
                rate_limit_burst: None,
                expires_at: None,
                last_used_at: None,
            },
        );
        let config: Arc<dyn ConfigReader> = Arc::new(reader);
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let pipeline = pipeline(config, store);

        let (result, _log) = pipeline.handle(request("missing-route", Some("sk_live"))).await;
        assert_eq!(result.unwrap_err(), GatewayError::RouteNotFound);
    }

    #[test]
    fn extract_vary_headers_is_case_insensitive() {
        let headers = vec![("Accept-Encoding".to_string(), "gzip".to_string())];
        let vary = extract_vary_headers(&headers, &["accept-encoding".to_string()]);
        assert_eq!(vary.get("accept-encoding"), Some(&"gzip".to_string()));
    }

    #[test]
    fn block_retry_after_floors_at_one_second_when_already_expired() {
        let retry_after = block_retry_after(Some(now_secs() - 10.0));
        assert_eq!(retry_after, Duration::from_secs(1));
    }

    #[test]
    fn block_retry_after_defaults_to_five_minutes_without_an_expiry() {
        assert_eq!(block_retry_after(None), Duration::from_secs(300));
    }
}
