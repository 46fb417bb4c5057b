//! Quota manager (C4): daily and monthly request counters per API key,
//! backed by the coordination store, with TTL set on first write so unused
//! keys self-clean.

use chrono::Utc;
use gateway_store::{Store, StoreError};
use std::sync::Arc;
use thiserror::Error;

const DAILY_TTL_SECS: u64 = 86_400;
const MONTHLY_TTL_SECS: u64 = 31 * 86_400;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaExceeded {
    Daily,
    Monthly,
}

impl QuotaExceeded {
    pub fn tag(&self) -> &'static str {
        match self {
            QuotaExceeded::Daily => "daily_quota_exceeded",
            QuotaExceeded::Monthly => "monthly_quota_exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub exceeded: Option<QuotaExceeded>,
}

pub struct QuotaManager {
    store: Arc<dyn Store>,
}

impl QuotaManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Checks both counters and, if neither is at its limit, increments
    /// both atomically per-counter. A limit of `0` means unlimited. Daily
    /// exhaustion takes precedence over monthly (§4.4).
    pub async fn check_and_increment(
        &self,
        api_key_id: i64,
        daily_limit: u64,
        monthly_limit: u64,
    ) -> Result<QuotaDecision, QuotaError> {
        let now = Utc::now();
        let daily_key = format!("quota:daily:{api_key_id}:{}", now.format("%Y-%m-%d"));
        let monthly_key = format!("quota:monthly:{api_key_id}:{}", now.format("%Y-%m"));

        let daily_count = self.current_count(&daily_key).await?;
        if daily_limit > 0 && daily_count >= daily_limit {
            return Ok(QuotaDecision {
                allowed: false,
                exceeded: Some(QuotaExceeded::Daily),
            });
        }

        let monthly_count = self.current_count(&monthly_key).await?;
        if monthly_limit > 0 && monthly_count >= monthly_limit {
            return Ok(QuotaDecision {
                allowed: false,
                exceeded: Some(QuotaExceeded::Monthly),
            });
        }

        let daily_after = self.store.incr_by(&daily_key, 1).await?;
        if daily_after == 1 {
            self.store
                .expire(&daily_key, std::time::Duration::from_secs(DAILY_TTL_SECS))
                .await?;
        }
        let monthly_after = self.store.incr_by(&monthly_key, 1).await?;
        if monthly_after == 1 {
            self.store
                .expire(&monthly_key, std::time::Duration::from_secs(MONTHLY_TTL_SECS))
                .await?;
        }

        Ok(QuotaDecision {
            allowed: true,
            exceeded: None,
        })
    }

    async fn current_count(&self, key: &str) -> Result<u64, QuotaError> {
        let raw = self.store.get(key).await?;
        Ok(raw
            .and_then(|bytes| std::str::from_utf8(&bytes).ok().map(str::to_owned))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::MemoryStore;

    #[tokio::test]
    async fn fourth_call_denies_a_three_request_daily_limit() {
        let manager = QuotaManager::new(Arc::new(MemoryStore::new()));
        for _ in 0..3 {
            let decision = manager.check_and_increment(1, 3, 0).await.unwrap();
            assert!(decision.allowed);
        }
        let fourth = manager.check_and_increment(1, 3, 0).await.unwrap();
        assert!(!fourth.allowed);
        assert_eq!(fourth.exceeded, Some(QuotaExceeded::Daily));
    }

    #[tokio::test]
    async fn independent_keys_do_not_share_quota() {
        let manager = QuotaManager::new(Arc::new(MemoryStore::new()));
        for _ in 0..3 {
            manager.check_and_increment(1, 3, 0).await.unwrap();
        }
        let other_key = manager.check_and_increment(2, 3, 0).await.unwrap();
        assert!(other_key.allowed);
    }

    #[tokio::test]
    async fn zero_limit_means_unlimited() {
        let manager = QuotaManager::new(Arc::new(MemoryStore::new()));
        for _ in 0..10 {
            assert!(manager.check_and_increment(1, 0, 0).await.unwrap().allowed);
        }
    }

    #[tokio::test]
    async fn daily_exhaustion_takes_precedence_over_monthly() {
        let manager = QuotaManager::new(Arc::new(MemoryStore::new()));
        manager.check_and_increment(1, 1, 100).await.unwrap();
        let second = manager.check_and_increment(1, 1, 100).await.unwrap();
        assert_eq!(second.exceeded, Some(QuotaExceeded::Daily));
    }
}
