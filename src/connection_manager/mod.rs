//! Tracking of live connections per identity.
//!
//! An identity may hold several connections at once (one per device).

mod registry;
mod stats;
mod types;

pub use registry::ConnectionRegistry;
pub use stats::{ConnectionStats, DeliveryResult};
pub use types::{ConnectionHandle, SendError};
