use gateway_core::GatewayEvent;
use std::time::Instant;

use crate::state::CircuitState;

#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    StateChanged {
        name: String,
        from: CircuitState,
        to: CircuitState,
        timestamp: Instant,
    },
    CallRejected {
        name: String,
        timestamp: Instant,
    },
}

impl GatewayEvent for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::StateChanged { .. } => "state_changed",
            CircuitBreakerEvent::CallRejected { .. } => "call_rejected",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::StateChanged { timestamp, .. } => *timestamp,
            CircuitBreakerEvent::CallRejected { timestamp, .. } => *timestamp,
        }
    }

    fn component_name(&self) -> &str {
        match self {
            CircuitBreakerEvent::StateChanged { name, .. } => name,
            CircuitBreakerEvent::CallRejected { name, .. } => name,
        }
    }
}
