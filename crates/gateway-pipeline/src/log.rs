//! One structured log record per request (§4.10), emitted exactly once
//! regardless of which stage the request stopped at.

use gateway_config::{ApiKeyId, RouteId, TenantId};
use gateway_core::RequestId;
use http::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatusTag {
    Hit,
    Stale,
    Miss,
    Bypass,
}

impl CacheStatusTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatusTag::Hit => "HIT",
            CacheStatusTag::Stale => "STALE",
            CacheStatusTag::Miss => "MISS",
            CacheStatusTag::Bypass => "BYPASS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestLogRecord {
    pub request_id: RequestId,
    pub method: Method,
    pub route_name: String,
    pub path: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub tenant_id: Option<TenantId>,
    pub api_key_id: Option<ApiKeyId>,
    pub route_id: Option<RouteId>,
    pub status_code: u16,
    pub latency_ms: u64,
    pub cache_status: Option<CacheStatusTag>,
    pub error_type: Option<&'static str>,
    pub upstream_latency_ms: Option<u64>,
    pub upstream_status: Option<u16>,
    pub response_size: Option<usize>,
}

impl RequestLogRecord {
    pub fn new(
        request_id: RequestId,
        method: Method,
        route_name: String,
        path: String,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            request_id,
            method,
            route_name,
            path,
            client_ip,
            user_agent,
            tenant_id: None,
            api_key_id: None,
            route_id: None,
            status_code: 0,
            latency_ms: 0,
            cache_status: None,
            error_type: None,
            upstream_latency_ms: None,
            upstream_status: None,
            response_size: None,
        }
    }

    pub fn emit(&self) {
        tracing::info!(
            request_id = %self.request_id,
            method = %self.method,
            route_name = %self.route_name,
            path = %self.path,
            client_ip = self.client_ip.as_deref(),
            user_agent = self.user_agent.as_deref(),
            tenant_id = self.tenant_id,
            api_key_id = self.api_key_id,
            route_id = self.route_id,
            status_code = self.status_code,
            latency_ms = self.latency_ms,
            cache_status = self.cache_status.map(|s| s.as_str()),
            error_type = self.error_type,
            upstream_latency_ms = self.upstream_latency_ms,
            upstream_status = self.upstream_status,
            response_size = self.response_size,
            "gateway request completed"
        );
    }
}
