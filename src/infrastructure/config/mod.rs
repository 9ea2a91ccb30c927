mod settings;

pub use settings::{ChatConfig, RedisConfig, ServerConfig, SessionConfig, Settings, WebSocketConfig};
