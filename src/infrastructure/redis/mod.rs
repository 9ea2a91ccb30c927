//! Redis access for the session backing store.

pub mod pool;

pub use pool::{PoolError, RedisPool};
