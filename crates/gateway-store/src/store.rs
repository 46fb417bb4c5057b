//! The `Store` trait: the single contract every rate-limit, quota, bloom,
//! abuse, circuit-breaker, and cache primitive is built against. Two
//! implementations exist: [`crate::redis_backend::RedisStore`] for the real
//! deployment and [`crate::memory::MemoryStore`] for tests and local runs
//! without an external dependency.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;

/// An opaque token proving ownership of a held lock; only the holder that
/// received this token can release the lock (compare-and-delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

/// The value a scripted evaluation returns. Scripts used by this codebase
/// only ever need to return an integer or a pair of integers, so this stays
/// deliberately small rather than modeling a full Lua return type.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Int(i64),
    /// `(allowed, auxiliary)` — the auxiliary value is remaining tokens/level
    /// for the bucket scripts, or the oldest surviving timestamp for the
    /// sliding-window script.
    AllowedWithAux(bool, f64),
}

/// Identifies which built-in script to run. Scripts are fixed and versioned
/// by name rather than sent as ad-hoc source strings, so the in-memory
/// backend can implement each one as a native non-atomic equivalent instead
/// of embedding a Lua interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    TokenBucket,
    SlidingWindowLog,
    LeakyBucket,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<i64, StoreError>;
    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<i64, StoreError>;
    /// Smallest surviving score, used to derive `reset_after` for the
    /// sliding-window log.
    async fn zmin_score(&self, key: &str) -> Result<Option<f64>, StoreError>;

    async fn setbit(&self, key: &str, offset: u64, value: bool) -> Result<bool, StoreError>;
    async fn getbit(&self, key: &str, offset: u64) -> Result<bool, StoreError>;

    /// Runs a built-in atomic script. The in-memory backend always returns
    /// `StoreError::NotSupported`; callers fall back to a non-atomic
    /// read-modify-write implementing the identical formula.
    async fn eval_script(
        &self,
        script: Script,
        key: &str,
        args: &[f64],
    ) -> Result<ScriptValue, StoreError>;

    /// Acquires a named lock. Returns `None` if `blocking_timeout` elapses
    /// (or immediately if it's `None` and the lock is already held).
    async fn acquire_lock(
        &self,
        key: &str,
        ttl: Duration,
        blocking_timeout: Option<Duration>,
    ) -> Result<Option<LockToken>, StoreError>;

    /// Releases a lock only if `token` still matches the stored owner.
    async fn release_lock(&self, key: &str, token: &LockToken) -> Result<bool, StoreError>;

    /// Best-effort prefix scan, used by cache purge. Documented as O(n) in
    /// total key count and non-atomic with respect to concurrent writers.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
