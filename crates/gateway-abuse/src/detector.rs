//! Real-time abuse detection for API keys (§4.6): tracks request and error
//! rates per key with EWMA smoothing, flags anomalies by z-score, and
//! applies a temporary soft block backed by the coordination store so the
//! block is visible to every gateway replica.

use gateway_store::Store;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::config::AbuseDetectorConfig;
use crate::error::AbuseError;
use crate::events::AbuseEvent;
use crate::metrics::{is_anomaly, update_ewma, update_variance, z_score, AbuseMetrics};

const PREFIX_METRICS: &str = "abuse:metrics:";
const PREFIX_BLOCK: &str = "abuse:block:";
const PREFIX_HISTORY: &str = "abuse:history:";
const RATE_WINDOW: f64 = 60.0;

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs_f64()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbuseCheckResult {
    pub is_blocked: bool,
    pub is_soft_limited: bool,
    pub rate_multiplier: f64,
    pub reason: Option<String>,
    pub anomaly_score: f64,
    pub block_until: Option<f64>,
}

impl AbuseCheckResult {
    fn clear() -> Self {
        Self {
            rate_multiplier: 1.0,
            ..Default::default()
        }
    }
}

pub struct AbuseDetector {
    store: Arc<dyn Store>,
    config: AbuseDetectorConfig,
}

impl AbuseDetector {
    pub fn new(store: Arc<dyn Store>, config: AbuseDetectorConfig) -> Self {
        Self { store, config }
    }

    /// Checks the current block state without recording a new request.
    pub async fn check_abuse(&self, api_key_id: &str) -> Result<AbuseCheckResult, AbuseError> {
        self.check_block(api_key_id).await
    }

    /// Records one completed request and returns the abuse verdict that
    /// should govern the *next* request for this key.
    pub async fn record_request(
        &self,
        api_key_id: &str,
        is_error: bool,
    ) -> Result<AbuseCheckResult, AbuseError> {
        let now = now_secs();
        let metrics_key = format!("{PREFIX_METRICS}{api_key_id}");

        let mut metrics = self.load_metrics(&metrics_key).await?;

        let blocked = self.check_block(api_key_id).await?;
        if blocked.is_blocked {
            return Ok(blocked);
        }

        if now - metrics.window_start > RATE_WINDOW {
            if metrics.window_requests > 0 {
                let current_rate = metrics.window_requests as f64 / RATE_WINDOW;
                let current_error_rate = metrics.window_errors as f64 / metrics.window_requests as f64;

                let old_ewma = metrics.ewma_rate;
                metrics.ewma_rate = update_ewma(metrics.ewma_rate, current_rate, self.config.alpha);
                metrics.ewma_rate_variance = update_variance(
                    metrics.ewma_rate_variance,
                    old_ewma,
                    current_rate,
                    self.config.alpha,
                );
                metrics.ewma_error_rate =
                    update_ewma(metrics.ewma_error_rate, current_error_rate, self.config.alpha);

                let anomaly = self
                    .check_anomaly(api_key_id, current_rate, current_error_rate, &metrics, now)
                    .await?;
                if anomaly.is_blocked || anomaly.is_soft_limited {
                    self.save_metrics(&metrics_key, &metrics).await?;
                    return Ok(anomaly);
                }
            }

            metrics.window_start = now;
            metrics.window_requests = 0;
            metrics.window_errors = 0;
        }

        metrics.window_requests += 1;
        metrics.total_requests += 1;
        if is_error {
            metrics.window_errors += 1;
            metrics.total_errors += 1;
        }
        metrics.last_rate_update = now;

        self.save_metrics(&metrics_key, &metrics).await?;
        Ok(AbuseCheckResult::clear())
    }

    /// Manually clears a block regardless of its expiry.
    pub async fn unblock(&self, api_key_id: &str) -> Result<bool, AbuseError> {
        let block_key = format!("{PREFIX_BLOCK}{api_key_id}");
        Ok(self.store.delete(&block_key).await?)
    }

    async fn check_block(&self, api_key_id: &str) -> Result<AbuseCheckResult, AbuseError> {
        let block_key = format!("{PREFIX_BLOCK}{api_key_id}");
        let fields = self.store.hgetall(&block_key).await?;
        if fields.is_empty() {
            return Ok(AbuseCheckResult::clear());
        }

        let field = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        let until: f64 = field("until").and_then(|v| v.parse().ok()).unwrap_or(0.0);

        if until > now_secs() {
            return Ok(AbuseCheckResult {
                is_blocked: true,
                reason: field("reason").or_else(|| Some("abuse_detected".to_string())),
                anomaly_score: field("score").and_then(|v| v.parse().ok()).unwrap_or(0.0),
                block_until: Some(until),
                ..AbuseCheckResult::clear()
            });
        }

        self.store.delete(&block_key).await?;
        Ok(AbuseCheckResult::clear())
    }

    async fn check_anomaly(
        &self,
        api_key_id: &str,
        current_rate: f64,
        current_error_rate: f64,
        metrics: &AbuseMetrics,
        now: f64,
    ) -> Result<AbuseCheckResult, AbuseError> {
        let std_dev = metrics.ewma_rate_variance.max(0.0).sqrt();
        let rate_z = z_score(current_rate, metrics.ewma_rate, std_dev);

        if is_anomaly(rate_z, self.config.z_threshold) {
            self.apply_block(
                api_key_id,
                "rate_spike",
                rate_z,
                current_rate,
                current_error_rate,
                now,
            )
            .await?;
            self.config.event_listeners.emit(&AbuseEvent::RateSpikeBlocked {
                key: api_key_id.to_string(),
                z_score: rate_z,
                timestamp: Instant::now(),
            });
            return Ok(AbuseCheckResult {
                is_blocked: true,
                reason: Some("rate_spike".to_string()),
                anomaly_score: rate_z,
                block_until: Some(now + self.config.block_duration_secs as f64),
                ..AbuseCheckResult::clear()
            });
        }

        if current_error_rate > 0.5 && metrics.total_requests > 10 {
            let error_z = (current_error_rate - metrics.ewma_error_rate) / 0.1;
            if error_z > self.config.z_threshold {
                self.config
                    .event_listeners
                    .emit(&AbuseEvent::ErrorRateSoftLimited {
                        key: api_key_id.to_string(),
                        z_score: error_z,
                        timestamp: Instant::now(),
                    });
                return Ok(AbuseCheckResult {
                    is_soft_limited: true,
                    rate_multiplier: 0.5,
                    reason: Some("error_rate_spike".to_string()),
                    anomaly_score: error_z,
                    ..Default::default()
                });
            }
        }

        Ok(AbuseCheckResult::clear())
    }

    async fn apply_block(
        &self,
        api_key_id: &str,
        reason: &str,
        score: f64,
        rate: f64,
        error_rate: f64,
        now: f64,
    ) -> Result<(), AbuseError> {
        let block_key = format!("{PREFIX_BLOCK}{api_key_id}");
        let blocked_until = now + self.config.block_duration_secs as f64;

        self.store.hset(&block_key, "until", &blocked_until.to_string()).await?;
        self.store.hset(&block_key, "reason", reason).await?;
        self.store.hset(&block_key, "score", &score.to_string()).await?;
        self.store.hset(&block_key, "rate", &rate.to_string()).await?;
        self.store.hset(&block_key, "error_rate", &error_rate.to_string()).await?;
        self.store.hset(&block_key, "blocked_at", &now.to_string()).await?;
        self.store
            .expire(
                &block_key,
                std::time::Duration::from_secs(self.config.block_duration_secs + 60),
            )
            .await?;

        let history_key = format!("{PREFIX_HISTORY}{api_key_id}");
        self.store
            .zadd(&history_key, &format!("{reason}:{now}"), now)
            .await?;

        Ok(())
    }

    async fn load_metrics(&self, key: &str) -> Result<AbuseMetrics, AbuseError> {
        let fields = self.store.hgetall(key).await?;
        if fields.is_empty() {
            return Ok(AbuseMetrics::default());
        }
        let field = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        let parse_f64 = |name: &str| field(name).and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let parse_u64 = |name: &str| field(name).and_then(|v| v.parse().ok()).unwrap_or(0);

        Ok(AbuseMetrics {
            ewma_rate: parse_f64("ewma_rate"),
            ewma_rate_variance: parse_f64("ewma_rate_variance"),
            last_rate_update: parse_f64("last_rate_update"),
            ewma_error_rate: parse_f64("ewma_error_rate"),
            total_requests: parse_u64("total_requests"),
            total_errors: parse_u64("total_errors"),
            window_start: parse_f64("window_start"),
            window_requests: parse_u64("window_requests"),
            window_errors: parse_u64("window_errors"),
        })
    }

    async fn save_metrics(&self, key: &str, metrics: &AbuseMetrics) -> Result<(), AbuseError> {
        self.store.hset(key, "ewma_rate", &metrics.ewma_rate.to_string()).await?;
        self.store
            .hset(key, "ewma_rate_variance", &metrics.ewma_rate_variance.to_string())
            .await?;
        self.store
            .hset(key, "last_rate_update", &metrics.last_rate_update.to_string())
            .await?;
        self.store
            .hset(key, "ewma_error_rate", &metrics.ewma_error_rate.to_string())
            .await?;
        self.store
            .hset(key, "total_requests", &metrics.total_requests.to_string())
            .await?;
        self.store
            .hset(key, "total_errors", &metrics.total_errors.to_string())
            .await?;
        self.store
            .hset(key, "window_start", &metrics.window_start.to_string())
            .await?;
        self.store
            .hset(key, "window_requests", &metrics.window_requests.to_string())
            .await?;
        self.store
            .hset(key, "window_errors", &metrics.window_errors.to_string())
            .await?;
        self.store
            .expire(key, std::time::Duration::from_secs(86_400))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::MemoryStore;

    fn detector() -> AbuseDetector {
        AbuseDetector::new(Arc::new(MemoryStore::new()), AbuseDetectorConfig::builder().build())
    }

    #[tokio::test]
    async fn first_request_is_never_blocked() {
        let detector = detector();
        let result = detector.record_request("key-a", false).await.unwrap();
        assert!(!result.is_blocked);
        assert!(!result.is_soft_limited);
        assert_eq!(result.rate_multiplier, 1.0);
    }

    #[tokio::test]
    async fn check_abuse_with_no_history_is_clear() {
        let detector = detector();
        let result = detector.check_abuse("unknown-key").await.unwrap();
        assert!(!result.is_blocked);
    }

    #[tokio::test]
    async fn unblock_removes_an_active_block() {
        let detector = detector();
        detector
            .apply_block("key-a", "rate_spike", 5.0, 10.0, 0.0, now_secs())
            .await
            .unwrap();
        assert!(detector.check_abuse("key-a").await.unwrap().is_blocked);
        assert!(detector.unblock("key-a").await.unwrap());
        assert!(!detector.check_abuse("key-a").await.unwrap().is_blocked);
    }

    #[tokio::test]
    async fn expired_block_is_lazily_cleared() {
        let detector = detector();
        let block_key = "abuse:block:key-a";
        detector.store.hset(block_key, "until", "1.0").await.unwrap();
        detector.store.hset(block_key, "reason", "rate_spike").await.unwrap();
        let result = detector.check_abuse("key-a").await.unwrap();
        assert!(!result.is_blocked);
        assert!(!detector.store.exists(block_key).await.unwrap());
    }
}
