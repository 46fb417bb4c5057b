use gateway_core::EventListeners;

use crate::events::RateLimiterEvent;

/// Which of the three atomic primitives (§4.3) backs a limiter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimiterKind {
    TokenBucket,
    SlidingWindowLog,
    LeakyBucket,
}

/// Configuration for one named rate limiter. Per-call `rate`/`capacity`
/// still come from the route or key being checked (§4.3) — this config only
/// fixes the algorithm and the defaults used when no override applies.
pub struct RateLimiterConfig {
    pub(crate) kind: RateLimiterKind,
    pub(crate) default_rate: f64,
    pub(crate) default_burst: u32,
    pub(crate) event_listeners: EventListeners<RateLimiterEvent>,
    pub(crate) name: String,
}

impl RateLimiterConfig {
    pub fn builder(kind: RateLimiterKind) -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new(kind)
    }
}

pub struct RateLimiterConfigBuilder {
    kind: RateLimiterKind,
    default_rate: f64,
    default_burst: u32,
    event_listeners: EventListeners<RateLimiterEvent>,
    name: String,
}

impl RateLimiterConfigBuilder {
    pub fn new(kind: RateLimiterKind) -> Self {
        Self {
            kind,
            default_rate: 100.0,
            default_burst: 200,
            event_listeners: EventListeners::new(),
            name: "<unnamed>".to_string(),
        }
    }

    pub fn default_rate(mut self, rate: f64) -> Self {
        self.default_rate = rate;
        self
    }

    pub fn default_burst(mut self, burst: u32) -> Self {
        self.default_burst = burst;
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn on_event<L>(mut self, listener: L) -> Self
    where
        L: gateway_core::EventListener<RateLimiterEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    pub fn build(self) -> RateLimiterConfig {
        RateLimiterConfig {
            kind: self.kind,
            default_rate: self.default_rate,
            default_burst: self.default_burst,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }
}
