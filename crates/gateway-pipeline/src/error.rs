//! Conversions from each component crate's error type into the unified
//! [`GatewayError`]. These live here rather than as `From` impls on
//! `GatewayError` itself: neither `GatewayError` nor most of the source
//! types are owned by the same crate, so the orphan rule blocks a direct
//! `impl From<X> for GatewayError` anywhere but `gateway-core` or the crate
//! that defines `X`. A pipeline-local trait sidesteps that the same way this
//! codebase writes cross-layer conversions at the point where both sides of
//! the boundary are known, rather than threading them through a shared type.

use gateway_config::ConfigError;
use gateway_core::GatewayError;
use gateway_upstream::UpstreamError;

pub(crate) trait IntoGatewayError {
    fn into_gateway_error(self) -> GatewayError;
}

impl IntoGatewayError for ConfigError {
    fn into_gateway_error(self) -> GatewayError {
        match self {
            ConfigError::KeyNotFound => GatewayError::InvalidApiKey,
            ConfigError::RouteNotMatched => GatewayError::RouteNotFound,
        }
    }
}

impl IntoGatewayError for UpstreamError {
    fn into_gateway_error(self) -> GatewayError {
        match self {
            UpstreamError::Timeout => GatewayError::UpstreamTimeout,
            UpstreamError::Request(message) => {
                tracing::warn!(error = %message, "upstream request failed");
                GatewayError::UpstreamError
            }
        }
    }
}

/// Logs a stage-internal failure that the pipeline degrades around rather
/// than propagating, per the fail-open posture in §7: a store-backed check
/// that can't run is treated as if it had allowed the request.
pub(crate) fn log_degraded(component: &'static str, err: impl std::fmt::Display) {
    tracing::warn!(component, error = %err, "stage-internal error, failing open");
}
