use gateway_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),
}
