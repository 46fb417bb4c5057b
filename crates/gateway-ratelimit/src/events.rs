use gateway_core::GatewayEvent;
use std::time::Instant;

#[derive(Debug, Clone)]
pub enum RateLimiterEvent {
    Allowed {
        name: String,
        key: String,
        timestamp: Instant,
    },
    Denied {
        name: String,
        key: String,
        retry_after_ms: u64,
        timestamp: Instant,
    },
}

impl GatewayEvent for RateLimiterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RateLimiterEvent::Allowed { .. } => "allowed",
            RateLimiterEvent::Denied { .. } => "denied",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RateLimiterEvent::Allowed { timestamp, .. } => *timestamp,
            RateLimiterEvent::Denied { timestamp, .. } => *timestamp,
        }
    }

    fn component_name(&self) -> &str {
        match self {
            RateLimiterEvent::Allowed { name, .. } => name,
            RateLimiterEvent::Denied { name, .. } => name,
        }
    }
}
