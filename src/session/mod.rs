//! Session-based identity resolution for incoming handshakes.
//!
//! A handshake carries the signed session cookie issued by the HTTP layer.
//! The resolver strips the signature, looks the token up in the session
//! store and yields the identity the session belongs to.

mod cookie;
mod resolver;
mod store;
mod types;

pub use cookie::{find_cookie, CookieSigner};
pub use resolver::SessionResolver;
pub use store::{
    create_session_store, MemorySessionStore, RedisSessionStore, SessionStore,
    SessionStoreBackend, SessionStoreError,
};
pub use types::{Identity, SessionError, SessionToken};
