//! The unified wire-facing error type.
//!
//! Every component crate defines its own `thiserror` error enum for its
//! internal failure modes; at the pipeline boundary those all collapse into
//! [`GatewayError`], which is the only type that knows about HTTP status
//! codes and wire error tags. This mirrors keeping a single outer error type
//! instead of threading per-layer conversions through every call site.

use std::fmt;
use std::time::Duration;

/// A wire-facing gateway error, one variant per entry in the error taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayError {
    MissingApiKey,
    InvalidApiKey,
    KeyInactive,
    KeyExpired,
    TenantInactive,
    KeyBlocked,
    RouteNotFound,
    Blocked { retry_after: Duration },
    RateLimited { retry_after: Duration },
    QuotaExceeded { exceeded: &'static str },
    UpstreamTimeout,
    UpstreamError,
    Internal(String),
}

impl GatewayError {
    /// The wire tag used in the JSON error envelope and in log records.
    pub fn tag(&self) -> &'static str {
        match self {
            GatewayError::MissingApiKey => "missing_api_key",
            GatewayError::InvalidApiKey => "invalid_api_key",
            GatewayError::KeyInactive => "key_inactive",
            GatewayError::KeyExpired => "key_expired",
            GatewayError::TenantInactive => "tenant_inactive",
            GatewayError::KeyBlocked => "key_blocked",
            GatewayError::RouteNotFound => "route_not_found",
            GatewayError::Blocked { .. } => "blocked",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::QuotaExceeded { exceeded } => exceeded,
            GatewayError::UpstreamTimeout => "upstream_timeout",
            GatewayError::UpstreamError => "upstream_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status code this error maps to.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::MissingApiKey | GatewayError::InvalidApiKey => 401,
            GatewayError::KeyInactive
            | GatewayError::KeyExpired
            | GatewayError::TenantInactive
            | GatewayError::KeyBlocked => 403,
            GatewayError::RouteNotFound => 404,
            GatewayError::Blocked { .. }
            | GatewayError::RateLimited { .. }
            | GatewayError::QuotaExceeded { .. } => 429,
            GatewayError::UpstreamTimeout => 504,
            GatewayError::UpstreamError => 502,
            GatewayError::Internal(_) => 500,
        }
    }

    /// `Retry-After` seconds, when the error carries one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GatewayError::Blocked { retry_after } | GatewayError::RateLimited { retry_after } => {
                Some(retry_after.as_secs().max(1))
            }
            _ => None,
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        GatewayError::Internal(message.into())
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Internal(message) => write!(f, "internal error: {message}"),
            other => write!(f, "{}", other.tag()),
        }
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_tag_agree_with_the_taxonomy() {
        assert_eq!(GatewayError::MissingApiKey.status(), 401);
        assert_eq!(GatewayError::MissingApiKey.tag(), "missing_api_key");
        assert_eq!(GatewayError::KeyBlocked.status(), 403);
        assert_eq!(GatewayError::RouteNotFound.status(), 404);
        assert_eq!(
            GatewayError::RateLimited {
                retry_after: Duration::from_secs(5)
            }
            .status(),
            429
        );
        assert_eq!(GatewayError::UpstreamTimeout.status(), 504);
        assert_eq!(GatewayError::UpstreamError.status(), 502);
        assert_eq!(GatewayError::Internal("boom".into()).status(), 500);
    }

    #[test]
    fn retry_after_is_only_present_where_expected() {
        assert_eq!(GatewayError::RouteNotFound.retry_after_secs(), None);
        assert_eq!(
            GatewayError::Blocked {
                retry_after: Duration::from_secs(0)
            }
            .retry_after_secs(),
            Some(1)
        );
    }
}
