use gateway_core::EventListeners;

use crate::events::AbuseEvent;

pub struct AbuseDetectorConfig {
    pub(crate) alpha: f64,
    pub(crate) z_threshold: f64,
    pub(crate) block_duration_secs: u64,
    pub(crate) event_listeners: EventListeners<AbuseEvent>,
}

impl AbuseDetectorConfig {
    pub fn builder() -> AbuseDetectorConfigBuilder {
        AbuseDetectorConfigBuilder::new()
    }
}

pub struct AbuseDetectorConfigBuilder {
    alpha: f64,
    z_threshold: f64,
    block_duration_secs: u64,
    event_listeners: EventListeners<AbuseEvent>,
}

impl AbuseDetectorConfigBuilder {
    pub fn new() -> Self {
        Self {
            alpha: 0.3,
            z_threshold: 3.0,
            block_duration_secs: 300,
            event_listeners: EventListeners::new(),
        }
    }

    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn z_threshold(mut self, threshold: f64) -> Self {
        self.z_threshold = threshold;
        self
    }

    pub fn block_duration_secs(mut self, secs: u64) -> Self {
        self.block_duration_secs = secs;
        self
    }

    pub fn on_event<L>(mut self, listener: L) -> Self
    where
        L: gateway_core::EventListener<AbuseEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    pub fn build(self) -> AbuseDetectorConfig {
        AbuseDetectorConfig {
            alpha: self.alpha,
            z_threshold: self.z_threshold,
            block_duration_secs: self.block_duration_secs,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for AbuseDetectorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
