//! Process-wide state shared across every axum handler (C11). Built once
//! in `main` from `Settings` and handed to the router as `axum::State`.

use std::sync::Arc;

use gateway_abuse::{AbuseDetector, AbuseDetectorConfig};
use gateway_circuitbreaker::CircuitBreakerConfig;
use gateway_config::{ConfigReader, StaticConfigReader};
use gateway_pipeline::GatewayPipeline;
use gateway_ratelimit::{RateLimiterConfig, RateLimiterKind};
use gateway_store::Store;
use gateway_upstream::UpstreamClient;

use crate::settings::Settings;

#[derive(Clone)]
pub struct GatewayState {
    pub pipeline: Arc<GatewayPipeline>,
    pub store: Arc<dyn Store>,
}

impl GatewayState {
    pub async fn bootstrap(settings: &Settings) -> Result<Self, gateway_store::StoreError> {
        let store = gateway_store::connect(&settings.coordination_url).await?;
        let config: Arc<dyn ConfigReader> = Arc::new(demo_config_reader());

        let rate_limiter_config = RateLimiterConfig::builder(RateLimiterKind::TokenBucket)
            .default_rate(settings.default_rate_limit_rps)
            .default_burst(settings.default_rate_limit_burst)
            .name("gateway")
            .build();

        let abuse_config = AbuseDetectorConfig::builder()
            .alpha(settings.abuse_ewma_alpha)
            .z_threshold(settings.abuse_zscore_threshold)
            .block_duration_secs(settings.abuse_block_duration_seconds)
            .build();
        let abuse = AbuseDetector::new(store.clone(), abuse_config);

        let circuit_breaker_config = CircuitBreakerConfig::builder().build();

        let pipeline = GatewayPipeline::new(
            config,
            store.clone(),
            rate_limiter_config,
            settings.default_rate_limit_rps,
            settings.default_rate_limit_burst,
            abuse,
            settings.bloom_expected_items,
            settings.bloom_false_positive_rate,
            circuit_breaker_config,
            UpstreamClient::new(),
        );

        Ok(Self {
            pipeline: Arc::new(pipeline),
            store,
        })
    }
}

/// Seeds the one fixture `ConfigReader` this workspace ships. The relational
/// admin surface this would normally come from is out of scope, so the
/// binary that bootstraps the data plane is "whatever populates it at
/// startup" (per the reader's own doc comment) — here, a single demo
/// tenant, key, route, and policy so the gateway is runnable out of the box.
fn demo_config_reader() -> StaticConfigReader {
    use gateway_config::models::{ApiKey, ApiKeyStatus, CachePolicy, Route, Tenant};
    use http::Method;

    let reader = StaticConfigReader::new();

    reader.insert_tenant(Tenant {
        id: 1,
        name: "demo".to_string(),
        is_active: true,
    });

    reader.insert_key(
        "demo-key",
        ApiKey {
            id: 1,
            tenant_id: 1,
            prefix: "demo-key".to_string(),
            status: ApiKeyStatus::Active,
            quota_daily: 100_000,
            quota_monthly: 1_000_000,
            rate_limit_rps: None,
            rate_limit_burst: None,
            expires_at: None,
            last_used_at: None,
        },
    );

    reader.insert_policy(CachePolicy {
        id: 1,
        ..CachePolicy::default()
    });

    reader.insert_route(Route {
        id: 1,
        name: "demo".to_string(),
        tenant_id: None,
        path_pattern: "/*".to_string(),
        methods: [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::PATCH]
            .into_iter()
            .collect(),
        upstream_base_url: "https://httpbin.org".to_string(),
        upstream_path_rewrite: None,
        timeout_ms: 30_000,
        request_headers_add: Vec::new(),
        request_headers_remove: Vec::new(),
        response_headers_add: Vec::new(),
        policy_id: Some(1),
        rate_limit_rps: None,
        rate_limit_burst: None,
        active: true,
        priority: 0,
    });

    reader
}
