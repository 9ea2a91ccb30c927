use std::sync::Arc;
use std::time::Instant;

use crate::broker::Broker;
use crate::config::Settings;
use crate::redis::RedisPool;
use crate::session::SessionStoreBackend;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub broker: Broker,
    /// Present when sessions are read from Redis
    pub redis: Option<Arc<RedisPool>>,
    pub session_backend: SessionStoreBackend,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        settings: Settings,
        broker: Broker,
        redis: Option<Arc<RedisPool>>,
        session_backend: SessionStoreBackend,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            broker,
            redis,
            session_backend,
            start_time: Instant::now(),
        }
    }
}
