//! Per-upstream circuit breaker (§4.7). State lives on the coordination
//! store under `circuit:{name}:*` so every gateway replica sees the same
//! breaker. Updates are plain read-modify-write rather than a script: the
//! ordering contract only requires that a concurrent race lands on some
//! state the FSM would allow from the state it read, not full atomicity.

use gateway_store::Store;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::config::CircuitBreakerConfig;
use crate::error::CircuitError;
use crate::events::CircuitBreakerEvent;
use crate::state::CircuitState;

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs_f64()
}

struct Snapshot {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    total_failure: u64,
    total_success: u64,
    last_change: f64,
}

pub struct CircuitBreaker {
    store: Arc<dyn Store>,
    name: String,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn Store>, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            store,
            name: name.into(),
            config,
        }
    }

    fn key(&self) -> String {
        format!("circuit:{}", self.name)
    }

    /// Whether a call may proceed right now. A `true` result from the OPEN
    /// state also performs the OPEN -> HALF_OPEN transition and reserves one
    /// of the half-open probe slots; a `true` result from HALF_OPEN reserves
    /// a probe slot without changing state.
    pub async fn can_execute(&self) -> Result<bool, CircuitError> {
        let mut snapshot = self.load().await?;

        let allowed = match snapshot.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if now_secs() - snapshot.last_change >= self.config.timeout_seconds {
                    self.transition(&mut snapshot, CircuitState::HalfOpen);
                    snapshot.half_open_calls = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if snapshot.half_open_calls < self.config.half_open_max_calls {
                    snapshot.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        };

        self.save(&snapshot).await?;
        if !allowed {
            self.config.event_listeners.emit(&CircuitBreakerEvent::CallRejected {
                name: self.name.clone(),
                timestamp: Instant::now(),
            });
        }
        Ok(allowed)
    }

    pub async fn record_success(&self) -> Result<(), CircuitError> {
        let mut snapshot = self.load().await?;
        snapshot.total_success += 1;

        match snapshot.state {
            CircuitState::Closed => {
                snapshot.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                snapshot.success_count += 1;
                if snapshot.success_count >= self.config.success_threshold {
                    self.transition(&mut snapshot, CircuitState::Closed);
                    snapshot.failure_count = 0;
                    snapshot.success_count = 0;
                    snapshot.half_open_calls = 0;
                }
            }
            CircuitState::Open => {}
        }

        self.save(&snapshot).await
    }

    pub async fn record_failure(&self) -> Result<(), CircuitError> {
        let mut snapshot = self.load().await?;
        snapshot.total_failure += 1;

        match snapshot.state {
            CircuitState::Closed => {
                snapshot.failure_count += 1;
                if snapshot.failure_count >= self.config.failure_threshold {
                    self.transition(&mut snapshot, CircuitState::Open);
                    snapshot.failure_count = 0;
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut snapshot, CircuitState::Open);
                snapshot.success_count = 0;
                snapshot.half_open_calls = 0;
            }
            CircuitState::Open => {}
        }

        self.save(&snapshot).await
    }

    fn transition(&self, snapshot: &mut Snapshot, to: CircuitState) {
        if snapshot.state != to {
            self.config.event_listeners.emit(&CircuitBreakerEvent::StateChanged {
                name: self.name.clone(),
                from: snapshot.state,
                to,
                timestamp: Instant::now(),
            });
        }
        snapshot.state = to;
        snapshot.last_change = now_secs();
    }

    async fn load(&self) -> Result<Snapshot, CircuitError> {
        let key = self.key();
        let fields = self.store.hgetall(&key).await?;
        let field = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        Ok(Snapshot {
            state: field("state").map(CircuitState::from_str).unwrap_or(CircuitState::Closed),
            failure_count: field("failure_count").and_then(|v| v.parse().ok()).unwrap_or(0),
            success_count: field("success_count").and_then(|v| v.parse().ok()).unwrap_or(0),
            half_open_calls: field("half_open_calls").and_then(|v| v.parse().ok()).unwrap_or(0),
            total_failure: field("total_failure").and_then(|v| v.parse().ok()).unwrap_or(0),
            total_success: field("total_success").and_then(|v| v.parse().ok()).unwrap_or(0),
            last_change: field("last_change").and_then(|v| v.parse().ok()).unwrap_or(0.0),
        })
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), CircuitError> {
        let key = self.key();
        self.store.hset(&key, "state", snapshot.state.as_str()).await?;
        self.store
            .hset(&key, "failure_count", &snapshot.failure_count.to_string())
            .await?;
        self.store
            .hset(&key, "success_count", &snapshot.success_count.to_string())
            .await?;
        self.store
            .hset(&key, "half_open_calls", &snapshot.half_open_calls.to_string())
            .await?;
        self.store
            .hset(&key, "total_failure", &snapshot.total_failure.to_string())
            .await?;
        self.store
            .hset(&key, "total_success", &snapshot.total_success.to_string())
            .await?;
        self.store
            .hset(&key, "last_change", &snapshot.last_change.to_string())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::MemoryStore;
    use std::time::Duration;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            Arc::new(MemoryStore::new()),
            "upstream-a",
            CircuitBreakerConfig::builder()
                .failure_threshold(3)
                .success_threshold(2)
                .timeout_seconds(0.5)
                .half_open_max_calls(1)
                .build(),
        )
    }

    #[tokio::test]
    async fn scenario_from_closed_through_open_half_open_and_back() {
        let breaker = breaker();

        for _ in 0..3 {
            assert!(breaker.can_execute().await.unwrap());
            breaker.record_failure().await.unwrap();
        }
        assert!(!breaker.can_execute().await.unwrap());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(breaker.can_execute().await.unwrap());

        breaker.record_success().await.unwrap();
        breaker.record_success().await.unwrap();

        assert!(breaker.can_execute().await.unwrap());
        assert!(breaker.can_execute().await.unwrap());
    }

    #[tokio::test]
    async fn half_open_failure_reopens_and_clears_counters() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(breaker.can_execute().await.unwrap());
        breaker.record_failure().await.unwrap();
        assert!(!breaker.can_execute().await.unwrap());
    }

    #[tokio::test]
    async fn half_open_respects_max_concurrent_probes() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(breaker.can_execute().await.unwrap());
        assert!(!breaker.can_execute().await.unwrap());
    }

    #[tokio::test]
    async fn success_in_closed_state_resets_failure_counter() {
        let breaker = breaker();
        breaker.record_failure().await.unwrap();
        breaker.record_failure().await.unwrap();
        breaker.record_success().await.unwrap();
        breaker.record_failure().await.unwrap();
        breaker.record_failure().await.unwrap();
        assert!(breaker.can_execute().await.unwrap());
    }
}
