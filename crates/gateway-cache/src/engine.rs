//! Cache engine (C8): the full read path (SWR refresh) and miss path
//! (single-flight + distributed-lock coalescing) from §4.8.

use gateway_config::models::CachePolicy;
use gateway_store::{LockToken, Store};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::entry::{CacheEntry, CacheStatus};
use crate::error::CacheError;
use crate::inflight::InFlightTable;
use crate::key::CacheKeyBuilder;

const INFLIGHT_WAIT: Duration = Duration::from_secs(5);
const REFRESH_LOCK_TTL: Duration = Duration::from_secs(30);
const STALE_REFRESH_LOCK_WAIT: Duration = Duration::from_secs(10);

pub struct CacheEngine {
    store: Arc<dyn Store>,
    inflight: InFlightTable,
}

impl CacheEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            inflight: InFlightTable::new(),
        }
    }

    pub async fn get(&self, key: &str) -> Result<(Option<CacheEntry>, CacheStatus), CacheError> {
        let raw = self.store.get(key).await?;
        let Some(raw) = raw else {
            return Ok((None, CacheStatus::Miss));
        };
        let entry: CacheEntry = serde_json::from_slice(&raw)?;
        match entry.status() {
            CacheStatus::Miss => {
                self.store.delete(key).await?;
                Ok((None, CacheStatus::Miss))
            }
            status => Ok((Some(entry), status)),
        }
    }

    /// Stores an entry subject to the policy's gates; returns
    /// `CacheError::NotCacheable` without writing anything if the gate
    /// fails, per §9's decision to surface this as a typed outcome.
    pub async fn set(&self, key: &str, entry: &CacheEntry, policy: &CachePolicy) -> Result<(), CacheError> {
        if policy.cache_no_store {
            return Err(CacheError::NotCacheable("cache_no_store"));
        }
        if !policy.is_cacheable_status(entry.status_code) {
            return Err(CacheError::NotCacheable("status_code"));
        }
        if entry.body.len() as u64 > policy.max_body_bytes {
            return Err(CacheError::NotCacheable("body_too_large"));
        }
        let bytes = serde_json::to_vec(entry)?;
        self.store
            .set(key, bytes, Some(Duration::from_secs(entry.total_ttl())))
            .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.store.delete(key).await?)
    }

    pub async fn purge_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let keys = self.store.scan_prefix(prefix).await?;
        let mut deleted = 0u64;
        for key in keys {
            if self.store.delete(&key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// The full SWR + single-flight + coalescing read path. `fetch_fn` is
    /// invoked at most once per cache miss per leader; waiters on the same
    /// process and stale-refresh background tasks share its result.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        policy: &CachePolicy,
        fetch_fn: F,
    ) -> Result<(Arc<CacheEntry>, CacheStatus), CacheError>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<CacheEntry, CacheError>> + Send + 'static,
    {
        let (existing, status) = self.get(key).await?;
        if let Some(entry) = existing {
            let entry = Arc::new(entry);
            if status == CacheStatus::Stale {
                self.spawn_background_refresh(key, policy.clone(), fetch_fn);
            }
            return Ok((entry, status));
        }

        match self.inflight.try_join(key) {
            Some(mut waiter) => match tokio::time::timeout(INFLIGHT_WAIT, waiter.recv()).await {
                Ok(Ok(Ok(entry))) => Ok((entry, CacheStatus::Miss)),
                Ok(Ok(Err(message))) => Err(CacheError::LeaderFailed(message)),
                _ => {
                    // Timed out, or the leader dropped without completing.
                    match self.inflight.try_join(key) {
                        None => self.fetch_as_leader(key, policy, fetch_fn).await,
                        Some(_) => {
                            let entry = fetch_fn().await?;
                            Ok((Arc::new(entry), CacheStatus::Miss))
                        }
                    }
                }
            },
            None => self.fetch_as_leader(key, policy, fetch_fn).await,
        }
    }

    async fn fetch_as_leader<F, Fut>(
        &self,
        key: &str,
        policy: &CachePolicy,
        fetch_fn: F,
    ) -> Result<(Arc<CacheEntry>, CacheStatus), CacheError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<CacheEntry, CacheError>>,
    {
        let lock_key = CacheKeyBuilder::lock_key(key);
        let token = self
            .store
            .acquire_lock(&lock_key, REFRESH_LOCK_TTL, Some(REFRESH_LOCK_TTL))
            .await?;

        let Some(token) = token else {
            // Another replica holds the distributed lock; give it a short
            // chance to publish its result to the shared store, then
            // bypass the cache entirely rather than wait indefinitely.
            self.inflight.cancel(key);
            if let Some(entry) = self.poll_for_remote_result(key, INFLIGHT_WAIT).await? {
                return Ok((Arc::new(entry), CacheStatus::Miss));
            }
            let entry = fetch_fn().await?;
            return Ok((Arc::new(entry), CacheStatus::Miss));
        };

        let result = fetch_fn().await;
        match result {
            Ok(entry) => {
                let entry = Arc::new(entry);
                let _ = self.set(key, &entry, policy).await;
                self.inflight.complete(key, Ok(entry.clone()));
                self.release_lock(&lock_key, token).await;
                Ok((entry, CacheStatus::Miss))
            }
            Err(err) => {
                self.inflight.complete(key, Err(err.to_string()));
                self.release_lock(&lock_key, token).await;
                Err(err)
            }
        }
    }

    async fn poll_for_remote_result(&self, key: &str, budget: Duration) -> Result<Option<CacheEntry>, CacheError> {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            if let (Some(entry), _) = self.get(key).await? {
                return Ok(Some(entry));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    fn spawn_background_refresh<F, Fut>(&self, key: &str, policy: CachePolicy, fetch_fn: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CacheEntry, CacheError>> + Send + 'static,
    {
        let store = self.store.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let lock_key = CacheKeyBuilder::lock_key(&key);
            let token = match store
                .acquire_lock(&lock_key, STALE_REFRESH_LOCK_WAIT, None)
                .await
            {
                Ok(Some(token)) => token,
                _ => return,
            };
            if let Ok(entry) = fetch_fn().await {
                if !policy.cache_no_store
                    && policy.is_cacheable_status(entry.status_code)
                    && entry.body.len() as u64 <= policy.max_body_bytes
                {
                    if let Ok(bytes) = serde_json::to_vec(&entry) {
                        let _ = store
                            .set(&key, bytes, Some(Duration::from_secs(entry.total_ttl())))
                            .await;
                    }
                }
            }
            let _ = store.release_lock(&lock_key, &token).await;
        });
    }

    async fn release_lock(&self, lock_key: &str, token: LockToken) {
        let _ = self.store.release_lock(lock_key, &token).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> CachePolicy {
        CachePolicy::default()
    }

    #[tokio::test]
    async fn miss_then_fetch_then_hit() {
        let engine = CacheEngine::new(Arc::new(MemoryStore::new()));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let fetch = move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(CacheEntry::new(200, vec![], b"fresh".to_vec(), 300, 60, String::new()))
            }
        };

        let (entry, status) = engine.get_or_fetch("cache:k", &policy(), fetch).await.unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(entry.body, b"fresh");

        let (entry, status) = engine.get("cache:k").await.unwrap();
        assert_eq!(status, CacheStatus::Fresh);
        assert_eq!(entry.unwrap().body, b"fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn set_rejects_non_cacheable_status() {
        let engine = CacheEngine::new(Arc::new(MemoryStore::new()));
        let entry = CacheEntry::new(500, vec![], b"err".to_vec(), 300, 60, String::new());
        let result = engine.set("cache:k", &entry, &policy()).await;
        assert!(matches!(result, Err(CacheError::NotCacheable(_))));
    }

    #[tokio::test]
    async fn set_rejects_cache_no_store() {
        let engine = CacheEngine::new(Arc::new(MemoryStore::new()));
        let mut gated = policy();
        gated.cache_no_store = true;
        let entry = CacheEntry::new(200, vec![], b"ok".to_vec(), 300, 60, String::new());
        let result = engine.set("cache:k", &entry, &gated).await;
        assert!(matches!(result, Err(CacheError::NotCacheable(_))));
    }

    #[tokio::test]
    async fn purge_by_prefix_removes_matching_keys() {
        let engine = CacheEngine::new(Arc::new(MemoryStore::new()));
        let entry = CacheEntry::new(200, vec![], b"ok".to_vec(), 300, 60, String::new());
        engine.set("cache:route-a:1", &entry, &policy()).await.unwrap();
        engine.set("cache:route-a:2", &entry, &policy()).await.unwrap();
        engine.set("cache:route-b:1", &entry, &policy()).await.unwrap();

        let removed = engine.purge_by_prefix("cache:route-a").await.unwrap();
        assert_eq!(removed, 2);
        assert!(engine.get("cache:route-b:1").await.unwrap().0.is_some());
    }
}
