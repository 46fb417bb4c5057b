//! Circuit breaker (C7): a 3-state machine per upstream name, state shared
//! across replicas via the coordination store.

pub mod breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod state;

pub use breaker::CircuitBreaker;
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use error::CircuitError;
pub use events::CircuitBreakerEvent;
pub use state::CircuitState;
