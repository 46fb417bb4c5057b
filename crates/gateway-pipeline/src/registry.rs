//! Lazily-created circuit breaker per upstream (§4.7), same shape as
//! [`gateway_bloom::NegativeCacheManager`]'s per-route filter cache: a
//! `RwLock<HashMap<...>>` guarding a lazily-populated map of long-lived
//! instances, each wrapped in an `Arc` so it can be cloned into a request's
//! fetch closure without cloning the breaker's own config on every call.

use gateway_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig};
use gateway_store::Store;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub struct CircuitBreakerRegistry {
    store: Arc<dyn Store>,
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(store: Arc<dyn Store>, config: CircuitBreakerConfig) -> Self {
        Self {
            store,
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// `upstream_name` identifies the breaker, typically the route's
    /// `upstream_base_url` so every route hitting the same backend shares
    /// one breaker instance.
    pub fn get(&self, upstream_name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().unwrap().get(upstream_name) {
            return existing.clone();
        }
        let mut breakers = self.breakers.write().unwrap();
        breakers
            .entry(upstream_name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    self.store.clone(),
                    upstream_name,
                    self.config.clone(),
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::MemoryStore;

    #[test]
    fn same_name_returns_the_same_instance() {
        let registry = CircuitBreakerRegistry::new(
            Arc::new(MemoryStore::new()),
            CircuitBreakerConfig::builder().build(),
        );
        let a = registry.get("http://upstream-a");
        let b = registry.get("http://upstream-a");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_names_get_independent_instances() {
        let registry = CircuitBreakerRegistry::new(
            Arc::new(MemoryStore::new()),
            CircuitBreakerConfig::builder().build(),
        );
        let a = registry.get("http://upstream-a");
        let b = registry.get("http://upstream-b");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
