use gateway_core::GatewayEvent;
use std::time::Instant;

#[derive(Debug, Clone)]
pub enum AbuseEvent {
    RateSpikeBlocked {
        key: String,
        z_score: f64,
        timestamp: Instant,
    },
    ErrorRateSoftLimited {
        key: String,
        z_score: f64,
        timestamp: Instant,
    },
}

impl GatewayEvent for AbuseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AbuseEvent::RateSpikeBlocked { .. } => "rate_spike_blocked",
            AbuseEvent::ErrorRateSoftLimited { .. } => "error_rate_soft_limited",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            AbuseEvent::RateSpikeBlocked { timestamp, .. } => *timestamp,
            AbuseEvent::ErrorRateSoftLimited { timestamp, .. } => *timestamp,
        }
    }

    fn component_name(&self) -> &str {
        match self {
            AbuseEvent::RateSpikeBlocked { key, .. } => key,
            AbuseEvent::ErrorRateSoftLimited { key, .. } => key,
        }
    }
}
