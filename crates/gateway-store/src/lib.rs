//! Coordination store client (C1): the substrate every rate-limit, quota,
//! bloom, abuse, and circuit-breaker primitive shares. One async trait,
//! [`Store`], with a Redis-compatible implementation for production and an
//! in-memory implementation for tests and for running without an external
//! dependency (`COORDINATION_URL` empty).

pub mod error;
pub mod memory;
pub mod redis_backend;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use redis_backend::RedisStore;
pub use store::{LockToken, Script, ScriptValue, Store};

use std::sync::Arc;

/// Connects to the backend named by `coordination_url`, or falls back to an
/// in-memory store when it's empty — the "demo mode" distinction from §4.1.
pub async fn connect(coordination_url: &str) -> Result<Arc<dyn Store>, StoreError> {
    if coordination_url.is_empty() {
        tracing::info!("COORDINATION_URL is empty, using in-memory store");
        Ok(Arc::new(MemoryStore::new()))
    } else {
        tracing::info!(url = coordination_url, "connecting to coordination store");
        Ok(Arc::new(RedisStore::connect(coordination_url).await?))
    }
}
