//! The three atomic primitives from §4.3. Each tries the coordination
//! store's scripted evaluation first; when the backend reports
//! `StoreError::NotSupported` (the in-memory fallback), each primitive falls
//! back to the documented non-atomic read-modify-write implementing the
//! identical formula.

use gateway_store::{Script, ScriptValue, Store, StoreError};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::{RateLimiterConfig, RateLimiterKind};
use crate::decision::RateLimitDecision;
use crate::error::RateLimitError;
use crate::events::RateLimiterEvent;

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub struct RateLimiter {
    store: Arc<dyn Store>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, config: RateLimiterConfig) -> Self {
        Self { store, config }
    }

    /// Checks `key` against `rate`/`capacity` (falls back to the limiter's
    /// configured defaults when `None`).
    pub async fn check(
        &self,
        key: &str,
        rate: Option<f64>,
        capacity: Option<u32>,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let rate = rate.unwrap_or(self.config.default_rate);
        let capacity = capacity.unwrap_or(self.config.default_burst) as f64;

        let decision = match self.config.kind {
            RateLimiterKind::TokenBucket => self.token_bucket(key, rate, capacity).await?,
            RateLimiterKind::SlidingWindowLog => self.sliding_window(key, rate, capacity).await?,
            RateLimiterKind::LeakyBucket => self.leaky_bucket(key, rate, capacity).await?,
        };

        let event = if decision.allowed {
            RateLimiterEvent::Allowed {
                name: self.config.name.clone(),
                key: key.to_string(),
                timestamp: std::time::Instant::now(),
            }
        } else {
            RateLimiterEvent::Denied {
                name: self.config.name.clone(),
                key: key.to_string(),
                retry_after_ms: decision
                    .retry_after
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
                timestamp: std::time::Instant::now(),
            }
        };
        self.config.event_listeners.emit(&event);

        Ok(decision)
    }

    async fn token_bucket(
        &self,
        key: &str,
        rate: f64,
        capacity: f64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let state_key = format!("ratelimit:tb:{key}");
        let now = now_secs();
        let ttl = (capacity / rate).ceil() as i64 + 60;

        match self
            .store
            .eval_script(Script::TokenBucket, &state_key, &[rate, capacity, now, ttl as f64])
            .await
        {
            Ok(ScriptValue::AllowedWithAux(allowed, tokens_remaining)) => {
                Ok(Self::token_bucket_decision(allowed, tokens_remaining, rate))
            }
            Ok(ScriptValue::Int(_)) => unreachable!("token bucket script always returns a pair"),
            Err(StoreError::NotSupported) => {
                self.token_bucket_fallback(&state_key, rate, capacity, now, ttl)
                    .await
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn token_bucket_fallback(
        &self,
        state_key: &str,
        rate: f64,
        capacity: f64,
        now: f64,
        ttl: i64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let tokens: f64 = self
            .store
            .hget(state_key, "tokens")
            .await?
            .and_then(|s| s.parse().ok())
            .unwrap_or(capacity);
        let last_update: f64 = self
            .store
            .hget(state_key, "last_update")
            .await?
            .and_then(|s| s.parse().ok())
            .unwrap_or(now);

        let elapsed = (now - last_update).max(0.0);
        let mut tokens = (tokens + elapsed * rate).min(capacity);
        let allowed = tokens >= 1.0;
        if allowed {
            tokens -= 1.0;
        }

        self.store.hset(state_key, "tokens", &tokens.to_string()).await?;
        self.store
            .hset(state_key, "last_update", &now.to_string())
            .await?;
        self.store
            .expire(state_key, Duration::from_secs(ttl.max(0) as u64))
            .await?;

        Ok(Self::token_bucket_decision(allowed, tokens, rate))
    }

    fn token_bucket_decision(allowed: bool, tokens_remaining: f64, rate: f64) -> RateLimitDecision {
        if allowed {
            RateLimitDecision::allow(tokens_remaining, Duration::from_secs_f64((1.0 / rate).max(0.0)))
        } else {
            let retry_after = ((1.0 - tokens_remaining) / rate).max(0.0);
            RateLimitDecision::deny(
                Duration::from_secs_f64(retry_after),
                Duration::from_secs_f64(retry_after),
            )
        }
    }

    async fn sliding_window(
        &self,
        key: &str,
        rate: f64,
        capacity: f64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let state_key = format!("ratelimit:sw:{key}");
        let now = now_secs();
        let window = capacity / rate;
        let ttl = window.ceil() as i64 + 60;

        match self
            .store
            .eval_script(
                Script::SlidingWindowLog,
                &state_key,
                &[window, capacity, now, ttl as f64],
            )
            .await
        {
            Ok(ScriptValue::AllowedWithAux(allowed, oldest)) => {
                Ok(Self::sliding_window_decision(allowed, oldest, window, now))
            }
            Ok(ScriptValue::Int(_)) => unreachable!(),
            Err(StoreError::NotSupported) => {
                self.sliding_window_fallback(&state_key, capacity, now, window, ttl)
                    .await
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn sliding_window_fallback(
        &self,
        state_key: &str,
        capacity: f64,
        now: f64,
        window: f64,
        ttl: i64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        self.store
            .zremrangebyscore(state_key, f64::MIN, now - window)
            .await?;
        let count = self.store.zcount(state_key, f64::MIN, f64::MAX).await? as f64;

        let allowed = count < capacity;
        if allowed {
            self.store.zadd(state_key, &now.to_string(), now).await?;
            self.store
                .expire(state_key, Duration::from_secs(ttl.max(0) as u64))
                .await?;
        }

        let oldest = self.store.zmin_score(state_key).await?.unwrap_or(now);
        Ok(Self::sliding_window_decision(allowed, oldest, window, now))
    }

    fn sliding_window_decision(allowed: bool, oldest: f64, window: f64, now: f64) -> RateLimitDecision {
        let reset_after = Duration::from_secs_f64((oldest + window - now).max(0.0));
        if allowed {
            RateLimitDecision::allow(0.0, reset_after)
        } else {
            RateLimitDecision::deny(reset_after, reset_after)
        }
    }

    async fn leaky_bucket(
        &self,
        key: &str,
        rate: f64,
        capacity: f64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let state_key = format!("ratelimit:lb:{key}");
        let now = now_secs();
        let ttl = (capacity / rate).ceil() as i64 + 60;

        match self
            .store
            .eval_script(Script::LeakyBucket, &state_key, &[rate, capacity, now, ttl as f64])
            .await
        {
            Ok(ScriptValue::AllowedWithAux(allowed, level)) => {
                Ok(Self::leaky_bucket_decision(allowed, level, capacity, rate))
            }
            Ok(ScriptValue::Int(_)) => unreachable!(),
            Err(StoreError::NotSupported) => {
                self.leaky_bucket_fallback(&state_key, rate, capacity, now, ttl)
                    .await
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn leaky_bucket_fallback(
        &self,
        state_key: &str,
        rate: f64,
        capacity: f64,
        now: f64,
        ttl: i64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let level: f64 = self
            .store
            .hget(state_key, "level")
            .await?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);
        let last_leak: f64 = self
            .store
            .hget(state_key, "last_leak")
            .await?
            .and_then(|s| s.parse().ok())
            .unwrap_or(now);

        let elapsed = (now - last_leak).max(0.0);
        let mut level = (level - elapsed * rate).max(0.0);
        let allowed = level < capacity;
        if allowed {
            level += 1.0;
        }

        self.store.hset(state_key, "level", &level.to_string()).await?;
        self.store
            .hset(state_key, "last_leak", &now.to_string())
            .await?;
        self.store
            .expire(state_key, Duration::from_secs(ttl.max(0) as u64))
            .await?;

        Ok(Self::leaky_bucket_decision(allowed, level, capacity, rate))
    }

    fn leaky_bucket_decision(allowed: bool, level: f64, capacity: f64, rate: f64) -> RateLimitDecision {
        if allowed {
            RateLimitDecision::allow(capacity - level, Duration::from_secs_f64((1.0 / rate).max(0.0)))
        } else {
            let wait = ((level - capacity + 1.0) / rate).max(0.0);
            RateLimitDecision::deny(Duration::from_secs_f64(wait), Duration::from_secs_f64(wait))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimiterConfig;
    use gateway_store::MemoryStore;

    fn limiter(kind: RateLimiterKind) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryStore::new()),
            RateLimiterConfig::builder(kind).name("test").build(),
        )
    }

    #[tokio::test]
    async fn token_bucket_allows_up_to_capacity_then_denies() {
        let limiter = limiter(RateLimiterKind::TokenBucket);
        let mut results = Vec::new();
        for _ in 0..5 {
            let decision = limiter.check("k", Some(1.0), Some(3)).await.unwrap();
            results.push(decision.allowed);
        }
        assert_eq!(results, vec![true, true, true, false, false]);
    }

    #[tokio::test]
    async fn token_bucket_refills_after_waiting() {
        let limiter = limiter(RateLimiterKind::TokenBucket);
        for _ in 0..3 {
            assert!(limiter.check("k2", Some(1.0), Some(3)).await.unwrap().allowed);
        }
        assert!(!limiter.check("k2", Some(1.0), Some(3)).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(limiter.check("k2", Some(1.0), Some(3)).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn sliding_window_allows_up_to_capacity() {
        let limiter = limiter(RateLimiterKind::SlidingWindowLog);
        let mut allowed_count = 0;
        for _ in 0..5 {
            if limiter.check("k", Some(10.0), Some(3)).await.unwrap().allowed {
                allowed_count += 1;
            }
        }
        assert_eq!(allowed_count, 3);
    }

    #[tokio::test]
    async fn leaky_bucket_allows_up_to_capacity_then_denies() {
        let limiter = limiter(RateLimiterKind::LeakyBucket);
        let mut allowed_count = 0;
        for _ in 0..5 {
            if limiter.check("k", Some(1.0), Some(3)).await.unwrap().allowed {
                allowed_count += 1;
            }
        }
        assert_eq!(allowed_count, 3);
    }

    #[tokio::test]
    async fn denied_decisions_always_carry_a_positive_retry_after() {
        let limiter = limiter(RateLimiterKind::TokenBucket);
        for _ in 0..3 {
            limiter.check("k3", Some(1.0), Some(3)).await.unwrap();
        }
        let denied = limiter.check("k3", Some(1.0), Some(3)).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after.unwrap() > Duration::from_millis(0));
    }
}
