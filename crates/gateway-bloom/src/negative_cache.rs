//! Per-route negative-cache layer over [`BloomFilter`] (§4.5): records 404s
//! observed from upstream and short-circuits future requests for the same
//! path before they reach upstream.

use gateway_store::Store;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::filter::{BloomError, BloomFilter};

pub struct NegativeCacheManager {
    store: Arc<dyn Store>,
    expected_items: u64,
    fp_rate: f64,
    filters: RwLock<HashMap<String, Arc<BloomFilter>>>,
}

impl NegativeCacheManager {
    pub fn new(store: Arc<dyn Store>, expected_items: u64, fp_rate: f64) -> Self {
        Self {
            store,
            expected_items,
            fp_rate,
            filters: RwLock::new(HashMap::new()),
        }
    }

    fn filter_for(&self, route_name: &str) -> Arc<BloomFilter> {
        if let Some(existing) = self.filters.read().unwrap().get(route_name) {
            return existing.clone();
        }
        let mut filters = self.filters.write().unwrap();
        filters
            .entry(route_name.to_string())
            .or_insert_with(|| {
                Arc::new(BloomFilter::new(
                    self.store.clone(),
                    route_name,
                    self.expected_items,
                    self.fp_rate,
                ))
            })
            .clone()
    }

    pub async fn record_404(&self, route_name: &str, path: &str) -> Result<(), BloomError> {
        self.filter_for(route_name).add(path).await
    }

    pub async fn is_likely_404(&self, route_name: &str, path: &str) -> Result<bool, BloomError> {
        self.filter_for(route_name).contains(path).await
    }

    pub async fn clear_route(&self, route_name: &str) -> Result<(), BloomError> {
        self.filter_for(route_name).clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::MemoryStore;

    #[tokio::test]
    async fn recorded_404_short_circuits_future_lookups() {
        let manager = NegativeCacheManager::new(Arc::new(MemoryStore::new()), 1000, 0.01);
        assert!(!manager.is_likely_404("routeA", "/items/99").await.unwrap());
        manager.record_404("routeA", "/items/99").await.unwrap();
        assert!(manager.is_likely_404("routeA", "/items/99").await.unwrap());
    }

    #[tokio::test]
    async fn routes_have_independent_filters() {
        let manager = NegativeCacheManager::new(Arc::new(MemoryStore::new()), 1000, 0.01);
        manager.record_404("routeA", "/items/99").await.unwrap();
        assert!(!manager.is_likely_404("routeB", "/items/99").await.unwrap());
    }
}
