//! Measures the fixed per-request overhead of the pipeline's auth/abuse/
//! rate-limit/quota gating stages against the in-memory store, independent
//! of any real upstream latency.

use criterion::{criterion_group, criterion_main, Criterion};
use gateway_abuse::{AbuseDetector, AbuseDetectorConfig};
use gateway_circuitbreaker::CircuitBreakerConfig;
use gateway_config::{ApiKey, ApiKeyStatus, ConfigReader, StaticConfigReader, Tenant};
use gateway_core::RequestId;
use gateway_pipeline::{GatewayPipeline, PipelineRequest};
use gateway_ratelimit::{RateLimiterConfig, RateLimiterKind};
use gateway_store::{MemoryStore, Store};
use gateway_upstream::UpstreamClient;
use http::Method;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn pipeline() -> GatewayPipeline {
    let reader = StaticConfigReader::new();
    reader.insert_tenant(Tenant {
        id: 1,
        name: "bench".to_string(),
        is_active: true,
    });
    reader.insert_key(
        "bench-key",
        ApiKey {
            id: 1,
            tenant_id: 1,
            prefix: "bench-key".to_string(),
            status: ApiKeyStatus::Active,
            quota_daily: u64::MAX,
            quota_monthly: u64::MAX,
            rate_limit_rps: None,
            rate_limit_burst: None,
            expires_at: None,
            last_used_at: None,
        },
    );
    let config: Arc<dyn ConfigReader> = Arc::new(reader);
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    GatewayPipeline::new(
        config,
        store.clone(),
        RateLimiterConfig::builder(RateLimiterKind::TokenBucket)
            .name("bench")
            .default_rate(1_000_000.0)
            .default_burst(1_000_000)
            .build(),
        1_000_000.0,
        1_000_000,
        AbuseDetector::new(store.clone(), AbuseDetectorConfig::builder().build()),
        10_000,
        0.01,
        CircuitBreakerConfig::builder().build(),
        UpstreamClient::new(),
    )
}

fn request() -> PipelineRequest {
    PipelineRequest {
        request_id: RequestId::new(),
        method: Method::GET,
        route_name: "missing".to_string(),
        path: "/items/1".to_string(),
        query: None,
        query_params: BTreeMap::new(),
        headers: Vec::new(),
        api_key: Some("bench-key".to_string()),
        client_ip: Some("127.0.0.1".to_string()),
        user_agent: None,
        body: None,
    }
}

fn auth_and_route_lookup(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let pipeline = pipeline();

    c.bench_function("auth through route-not-found", |b| {
        b.to_async(&rt).iter(|| async {
            let (result, _log) = pipeline.handle(request()).await;
            debug_assert!(result.is_err());
        });
    });
}

criterion_group!(benches, auth_and_route_lookup);
criterion_main!(benches);
