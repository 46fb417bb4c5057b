use gateway_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),
    #[error("entry is not cacheable: {0}")]
    NotCacheable(&'static str),
    #[error("failed to (de)serialize a cache entry: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("the leader fetch this request coalesced onto failed: {0}")]
    LeaderFailed(String),
}
