//! Rate-limit primitives (C3): token bucket, sliding-window log, and leaky
//! bucket, each atomic on the coordination store via a scripted evaluation,
//! with a documented non-atomic fallback for the in-memory backend.

mod config;
mod decision;
mod error;
mod events;
mod limiter;

pub use config::{RateLimiterConfig, RateLimiterConfigBuilder, RateLimiterKind};
pub use decision::RateLimitDecision;
pub use error::RateLimitError;
pub use events::RateLimiterEvent;
pub use limiter::RateLimiter;
