//! Single-process in-memory `Store`. Selected when `COORDINATION_URL` is
//! empty. Atomicity only holds within this process; [`Store::eval_script`]
//! always fails with [`StoreError::NotSupported`] so primitives pick their
//! documented non-atomic fallback.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{LockToken, Script, ScriptValue, Store};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

#[derive(Default)]
struct Tables {
    strings: HashMap<String, Entry>,
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, Vec<(String, f64)>>,
    bitmaps: HashMap<String, Vec<u8>>,
    locks: HashMap<String, (String, Instant)>,
}

/// In-memory fallback backend for [`Store`].
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    fn now() -> Instant {
        Instant::now()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Self::now();
        let mut tables = self.tables.lock().unwrap();
        if let Some(entry) = tables.strings.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
            tables.strings.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|d| Self::now() + d);
        self.tables
            .lock()
            .unwrap()
            .strings
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let removed = tables.strings.remove(key).is_some();
        tables.hashes.remove(key);
        tables.zsets.remove(key);
        tables.bitmaps.remove(key);
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(entry) = tables.strings.get_mut(key) {
            entry.expires_at = Some(Self::now() + ttl);
            return Ok(true);
        }
        Ok(false)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Self::now();
        let tables = self.tables.lock().unwrap();
        Ok(tables.strings.get(key).and_then(|entry| {
            entry
                .expires_at
                .map(|exp| exp.saturating_duration_since(now))
        }))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let now = Self::now();
        let mut tables = self.tables.lock().unwrap();
        let current = tables
            .strings
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| std::str::from_utf8(&e.value).ok())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        let updated = current + delta;
        let expires_at = tables.strings.get(key).and_then(|e| e.expires_at);
        tables.strings.insert(
            key.to_string(),
            Entry {
                value: updated.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(updated)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.tables
            .lock()
            .unwrap()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .hashes
            .get_mut(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let set = tables.zsets.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_string(), score));
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(set) = tables.zsets.get_mut(key) {
            let before = set.len();
            set.retain(|(_, score)| *score < min || *score > max);
            return Ok((before - set.len()) as i64);
        }
        Ok(0)
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<i64, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .zsets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(_, score)| *score >= min && *score <= max)
                    .count() as i64
            })
            .unwrap_or(0))
    }

    async fn zmin_score(&self, key: &str) -> Result<Option<f64>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .zsets
            .get(key)
            .and_then(|set| set.iter().map(|(_, s)| *s).fold(None, |acc, s| {
                Some(acc.map_or(s, |a: f64| a.min(s)))
            })))
    }

    async fn setbit(&self, key: &str, offset: u64, value: bool) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let bitmap = tables.bitmaps.entry(key.to_string()).or_default();
        let byte_index = (offset / 8) as usize;
        let bit_index = (offset % 8) as u8;
        if bitmap.len() <= byte_index {
            bitmap.resize(byte_index + 1, 0);
        }
        let mask = 1u8 << (7 - bit_index);
        let previous = bitmap[byte_index] & mask != 0;
        if value {
            bitmap[byte_index] |= mask;
        } else {
            bitmap[byte_index] &= !mask;
        }
        Ok(previous)
    }

    async fn getbit(&self, key: &str, offset: u64) -> Result<bool, StoreError> {
        let tables = self.tables.lock().unwrap();
        let byte_index = (offset / 8) as usize;
        let bit_index = (offset % 8) as u8;
        Ok(tables
            .bitmaps
            .get(key)
            .and_then(|bitmap| bitmap.get(byte_index))
            .map(|byte| byte & (1u8 << (7 - bit_index)) != 0)
            .unwrap_or(false))
    }

    async fn eval_script(
        &self,
        _script: Script,
        _key: &str,
        _args: &[f64],
    ) -> Result<ScriptValue, StoreError> {
        Err(StoreError::NotSupported)
    }

    async fn acquire_lock(
        &self,
        key: &str,
        ttl: Duration,
        blocking_timeout: Option<Duration>,
    ) -> Result<Option<LockToken>, StoreError> {
        let token = Uuid::new_v4().to_string();
        let deadline = blocking_timeout.map(|d| Instant::now() + d);
        loop {
            let acquired = {
                let mut tables = self.tables.lock().unwrap();
                let now = Instant::now();
                let held = tables
                    .locks
                    .get(key)
                    .map(|(_, expires)| *expires > now)
                    .unwrap_or(false);
                if held {
                    false
                } else {
                    tables
                        .locks
                        .insert(key.to_string(), (token.clone(), now + ttl));
                    true
                }
            };
            if acquired {
                return Ok(Some(LockToken(token)));
            }
            match deadline {
                None => return Ok(None),
                Some(deadline) if Instant::now() >= deadline => return Ok(None),
                Some(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    }

    async fn release_lock(&self, key: &str, token: &LockToken) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        if tables.locks.get(key).map(|(t, _)| t.as_str()) == Some(token.0.as_str()) {
            tables.locks.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = Self::now();
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .strings
            .iter()
            .filter(|(k, entry)| k.starts_with(prefix) && entry.is_live(now))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_set_round_trips_and_respects_ttl() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        store
            .set("k2", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_by_accumulates() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_by("c", 1).await.unwrap(), 1);
        assert_eq!(store.incr_by("c", 2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn scripted_eval_is_not_supported() {
        let store = MemoryStore::new();
        let result = store.eval_script(Script::TokenBucket, "rl", &[1.0, 1.0]).await;
        assert!(matches!(result, Err(StoreError::NotSupported)));
    }

    #[tokio::test]
    async fn lock_acquire_release_round_trips() {
        let store = MemoryStore::new();
        let token = store
            .acquire_lock("lock:a", Duration::from_secs(5), None)
            .await
            .unwrap()
            .expect("should acquire uncontended lock");

        let second = store
            .acquire_lock("lock:a", Duration::from_secs(5), None)
            .await
            .unwrap();
        assert!(second.is_none(), "lock is already held");

        assert!(store.release_lock("lock:a", &token).await.unwrap());
        assert!(store
            .acquire_lock("lock:a", Duration::from_secs(5), None)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn bitmap_setbit_getbit_round_trip() {
        let store = MemoryStore::new();
        assert!(!store.getbit("bm", 10).await.unwrap());
        let previous = store.setbit("bm", 10, true).await.unwrap();
        assert!(!previous);
        assert!(store.getbit("bm", 10).await.unwrap());
    }

    #[tokio::test]
    async fn zset_window_trim_and_count() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 1.0).await.unwrap();
        store.zadd("z", "b", 2.0).await.unwrap();
        store.zadd("z", "c", 10.0).await.unwrap();
        store.zremrangebyscore("z", 0.0, 5.0).await.unwrap();
        assert_eq!(store.zcount("z", 0.0, 100.0).await.unwrap(), 1);
        assert_eq!(store.zmin_score("z").await.unwrap(), Some(10.0));
    }
}
