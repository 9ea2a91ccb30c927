//! WebSocket transport: origin gate, handshake, per-connection dispatch and
//! the wire envelope.

mod dispatch;
mod handler;
mod handshake;
mod message;
mod origin;

pub use dispatch::{CloseReason, CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NO_STATUS};
pub use handler::ws_handler;
pub use handshake::{select_protocol, Accepted, Handshake, HandshakeError};
pub use message::{Envelope, OutboundMessage};
pub use origin::OriginGate;
