use thiserror::Error;

/// Failure modes of the coordination store client.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend does not support scripted atomic evaluation. Returned by
    /// the in-memory fallback so primitives can pick a non-atomic path.
    #[error("operation not supported by this store backend")]
    NotSupported,

    /// The connection to the real backend is down; callers on the hot path
    /// should treat this as fail-open per the pipeline's degradation policy.
    #[error("store backend unavailable: {0}")]
    Unavailable(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}
