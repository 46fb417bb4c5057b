//! The read-through contract in front of the (out-of-scope) relational
//! configuration store. The data plane depends only on [`ConfigReader`];
//! [`StaticConfigReader`] is the in-memory fixture this workspace ships so
//! the reader has something to run against. A real relational-store-backed
//! implementation plugs into the same trait without the pipeline changing.

use async_trait::async_trait;
use chrono::Utc;
use http::Method;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::ConfigError;
use crate::models::{ApiKey, ApiKeyId, BlockRule, CachePolicy, PolicyId, Route, Tenant, TenantId};

#[async_trait]
pub trait ConfigReader: Send + Sync {
    async fn lookup_key(&self, secret: &str) -> Result<(ApiKey, Tenant), ConfigError>;

    /// Among active routes named `name` accepting `method`, prefers a route
    /// scoped to `tenant_id`; falls back to a shared route (`tenant_id ==
    /// None`); ties within either group break by `priority DESC` (§4.2).
    async fn find_route(
        &self,
        name: &str,
        method: &Method,
        tenant_id: TenantId,
    ) -> Result<Route, ConfigError>;

    async fn active_block(&self, api_key_id: ApiKeyId) -> Option<BlockRule>;

    async fn cache_policy(&self, policy_id: PolicyId) -> CachePolicy;

    /// Advisory, best-effort: failure to persist is logged and ignored by
    /// the caller (fail-open, per §7).
    async fn touch_last_used(&self, api_key_id: ApiKeyId);
}

/// An in-memory `ConfigReader` populated once at process startup. Stands in
/// for the relational store the real admin surface would back this with.
#[derive(Default)]
pub struct StaticConfigReader {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
    keys_by_secret: RwLock<HashMap<String, ApiKey>>,
    routes: RwLock<Vec<Route>>,
    policies: RwLock<HashMap<PolicyId, CachePolicy>>,
    blocks: RwLock<HashMap<ApiKeyId, BlockRule>>,
}

impl StaticConfigReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tenant(&self, tenant: Tenant) {
        self.tenants.write().unwrap().insert(tenant.id, tenant);
    }

    pub fn insert_key(&self, secret: &str, key: ApiKey) {
        self.keys_by_secret
            .write()
            .unwrap()
            .insert(secret.to_string(), key);
    }

    pub fn insert_route(&self, route: Route) {
        self.routes.write().unwrap().push(route);
    }

    pub fn insert_policy(&self, policy: CachePolicy) {
        self.policies.write().unwrap().insert(policy.id, policy);
    }

    pub fn insert_block(&self, block: BlockRule) {
        self.blocks.write().unwrap().insert(block.api_key_id, block);
    }
}

#[async_trait]
impl ConfigReader for StaticConfigReader {
    async fn lookup_key(&self, secret: &str) -> Result<(ApiKey, Tenant), ConfigError> {
        let key = self
            .keys_by_secret
            .read()
            .unwrap()
            .get(secret)
            .cloned()
            .ok_or(ConfigError::KeyNotFound)?;
        let tenant = self
            .tenants
            .read()
            .unwrap()
            .get(&key.tenant_id)
            .cloned()
            .ok_or(ConfigError::KeyNotFound)?;
        Ok((key, tenant))
    }

    async fn find_route(
        &self,
        name: &str,
        method: &Method,
        tenant_id: TenantId,
    ) -> Result<Route, ConfigError> {
        let routes = self.routes.read().unwrap();
        let mut candidates: Vec<&Route> = routes
            .iter()
            .filter(|r| r.active && r.name == name && r.matches_method(method))
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

        candidates
            .iter()
            .find(|r| r.tenant_id == Some(tenant_id))
            .or_else(|| candidates.iter().find(|r| r.tenant_id.is_none()))
            .map(|r| (*r).clone())
            .ok_or(ConfigError::RouteNotMatched)
    }

    async fn active_block(&self, api_key_id: ApiKeyId) -> Option<BlockRule> {
        let now = Utc::now();
        let blocks = self.blocks.read().unwrap();
        blocks
            .get(&api_key_id)
            .filter(|b| b.is_active(now))
            .cloned()
    }

    async fn cache_policy(&self, policy_id: PolicyId) -> CachePolicy {
        self.policies
            .read()
            .unwrap()
            .get(&policy_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn touch_last_used(&self, api_key_id: ApiKeyId) {
        let mut keys = self.keys_by_secret.write().unwrap();
        if let Some(key) = keys.values_mut().find(|k| k.id == api_key_id) {
            key.last_used_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ApiKeyStatus;

    fn sample_route(tenant_id: Option<TenantId>, priority: i32) -> Route {
        Route {
            id: 1,
            name: "items".into(),
            tenant_id,
            path_pattern: "/items/*".into(),
            methods: [Method::GET].into_iter().collect(),
            upstream_base_url: "http://upstream".into(),
            upstream_path_rewrite: None,
            timeout_ms: 5000,
            request_headers_add: Vec::new(),
            request_headers_remove: Vec::new(),
            response_headers_add: Vec::new(),
            policy_id: None,
            rate_limit_rps: None,
            rate_limit_burst: None,
            active: true,
            priority,
        }
    }

    #[tokio::test]
    async fn tenant_scoped_route_wins_over_shared() {
        let reader = StaticConfigReader::new();
        reader.insert_route(sample_route(None, 0));
        reader.insert_route(sample_route(Some(7), 0));

        let matched = reader.find_route("items", &Method::GET, 7).await.unwrap();
        assert_eq!(matched.tenant_id, Some(7));
    }

    #[tokio::test]
    async fn falls_back_to_shared_route_when_no_tenant_match() {
        let reader = StaticConfigReader::new();
        reader.insert_route(sample_route(None, 0));

        let matched = reader.find_route("items", &Method::GET, 99).await.unwrap();
        assert_eq!(matched.tenant_id, None);
    }

    #[tokio::test]
    async fn higher_priority_breaks_ties_within_the_same_scope() {
        let reader = StaticConfigReader::new();
        let mut low = sample_route(None, 0);
        low.id = 1;
        let mut high = sample_route(None, 5);
        high.id = 2;
        reader.insert_route(low);
        reader.insert_route(high);

        let matched = reader.find_route("items", &Method::GET, 1).await.unwrap();
        assert_eq!(matched.id, 2);
    }

    #[tokio::test]
    async fn unknown_secret_is_not_found() {
        let reader = StaticConfigReader::new();
        assert_eq!(
            reader.lookup_key("missing").await,
            Err(ConfigError::KeyNotFound)
        );
    }

    #[tokio::test]
    async fn expired_key_is_not_usable() {
        let key = ApiKey {
            id: 1,
            tenant_id: 1,
            prefix: "gw_abc".into(),
            status: ApiKeyStatus::Active,
            quota_daily: 0,
            quota_monthly: 0,
            rate_limit_rps: None,
            rate_limit_burst: None,
            expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            last_used_at: None,
        };
        assert!(!key.is_usable(Utc::now()));
    }
}
