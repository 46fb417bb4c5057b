use gateway_core::EventListeners;

use crate::events::CircuitBreakerEvent;

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub(crate) failure_threshold: u32,
    pub(crate) success_threshold: u32,
    pub(crate) timeout_seconds: f64,
    pub(crate) half_open_max_calls: u32,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

pub struct CircuitBreakerConfigBuilder {
    failure_threshold: u32,
    success_threshold: u32,
    timeout_seconds: f64,
    half_open_max_calls: u32,
    event_listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_seconds: 30.0,
            half_open_max_calls: 1,
            event_listeners: EventListeners::new(),
        }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn timeout_seconds(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }

    pub fn on_event<L>(mut self, listener: L) -> Self
    where
        L: gateway_core::EventListener<CircuitBreakerEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    pub fn build(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout_seconds: self.timeout_seconds,
            half_open_max_calls: self.half_open_max_calls,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
