//! Shared primitives for the gateway data plane: the unified error type, the
//! event/listener system every component plugs into for observability, and
//! request identifiers.

pub mod error;
pub mod events;
pub mod ids;

pub use error::GatewayError;
pub use events::{EventListener, EventListeners, FnListener, GatewayEvent};
pub use ids::RequestId;
