//! Configuration entities (§3). These are created and maintained by the
//! admin CRUD surface, which is out of scope here; the data plane only
//! reads them (with one advisory exception, [`ApiKey::last_used_at`]).

use chrono::{DateTime, Utc};
use http::Method;
use std::collections::HashSet;

pub type TenantId = i64;
pub type ApiKeyId = i64;
pub type RouteId = i64;
pub type PolicyId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyStatus {
    Active,
    Disabled,
    Revoked,
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub tenant_id: TenantId,
    pub prefix: String,
    pub status: ApiKeyStatus,
    pub quota_daily: u64,
    pub quota_monthly: u64,
    pub rate_limit_rps: Option<f64>,
    pub rate_limit_burst: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// `status == Active` and not expired. Tenant activity and block rules
    /// are checked separately by the pipeline, matching §4.2's auth rule.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == ApiKeyStatus::Active && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub id: RouteId,
    pub name: String,
    pub tenant_id: Option<TenantId>,
    pub path_pattern: String,
    pub methods: HashSet<Method>,
    pub upstream_base_url: String,
    pub upstream_path_rewrite: Option<String>,
    pub timeout_ms: u64,
    pub request_headers_add: Vec<(String, String)>,
    pub request_headers_remove: Vec<String>,
    pub response_headers_add: Vec<(String, String)>,
    pub policy_id: Option<PolicyId>,
    pub rate_limit_rps: Option<f64>,
    pub rate_limit_burst: Option<u32>,
    pub active: bool,
    pub priority: i32,
}

impl Route {
    pub fn matches_method(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// `upstream_base_url` (trailing slash stripped) + rewrite prefix + path.
    pub fn upstream_url(&self, path: &str) -> String {
        let base = self.upstream_base_url.trim_end_matches('/');
        let rewrite = self.upstream_path_rewrite.as_deref().unwrap_or("");
        format!("{base}{rewrite}{path}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub id: PolicyId,
    pub ttl_seconds: u64,
    pub stale_seconds: u64,
    pub vary_headers: Vec<String>,
    pub cacheable_statuses: HashSet<u16>,
    pub max_body_bytes: u64,
    pub cache_no_store: bool,
    pub cache_private: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            id: 0,
            ttl_seconds: 300,
            stale_seconds: 60,
            vary_headers: Vec::new(),
            cacheable_statuses: [200, 201, 204, 301, 304].into_iter().collect(),
            max_body_bytes: 10 * 1024 * 1024,
            cache_no_store: false,
            cache_private: false,
        }
    }
}

impl CachePolicy {
    pub fn is_cacheable_status(&self, status: u16) -> bool {
        self.cacheable_statuses.contains(&status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    RateSpike,
    ErrorRateSpike,
    QuotaAbuse,
    SuspiciousPattern,
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockRule {
    pub api_key_id: ApiKeyId,
    pub reason: BlockReason,
    pub blocked_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
    pub anomaly_score: Option<f64>,
    pub rate_at_block: Option<f64>,
    pub error_rate_at_block: Option<f64>,
    pub unblocked_at: Option<DateTime<Utc>>,
}

impl BlockRule {
    pub fn is_permanent(&self) -> bool {
        self.blocked_until.is_none()
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.unblocked_at.is_none() && self.blocked_until.map(|until| until > now).unwrap_or(true)
    }
}
