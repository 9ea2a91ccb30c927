use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Origins permitted to open a connection. Empty rejects everyone.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Sub-protocol selected during the upgrade, if the client offers it
    #[serde(default = "default_protocol")]
    pub protocol: Option<String>,
    /// Outbound queue depth per connection
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    /// Upper bound on a single enqueue during fan-out, in milliseconds
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Close connections silent for this long. 0 disables the timeout.
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Name of the cookie carrying the signed session id
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Secret the session middleware signs cookies with
    #[serde(default)]
    pub secret: String,
    /// "memory" or "redis"
    #[serde(default = "default_session_backend")]
    pub backend: String,
    /// Key prefix of session documents in Redis
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Store lookup timeout in milliseconds. 0 disables the timeout.
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatConfig {
    /// Rooms any authenticated identity may join with INIT.
    /// Every other room needs an explicit grant.
    #[serde(default)]
    pub public_rooms: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_protocol() -> Option<String> {
    Some("echo-protocol".to_string())
}

fn default_channel_buffer() -> usize {
    32
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_cookie_name() -> String {
    "connect.sid".to_string()
}

fn default_session_backend() -> String {
    "memory".to_string()
}

fn default_key_prefix() -> String {
    "sess:".to_string()
}

fn default_lookup_timeout_ms() -> u64 {
    5000
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("session.cookie_name", default_cookie_name())?
            .set_default("session.backend", default_session_backend())?
            .set_default("redis.url", default_redis_url())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // BROKER__SESSION__SECRET, BROKER__WEBSOCKET__ALLOWED_ORIGINS=a,b, ...
            .add_source(
                Environment::with_prefix("BROKER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("websocket.allowed_origins")
                    .with_list_parse_key("chat.public_rooms"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebSocketConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl SessionConfig {
    pub fn lookup_timeout(&self) -> Option<Duration> {
        (self.lookup_timeout_ms > 0).then(|| Duration::from_millis(self.lookup_timeout_ms))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            protocol: default_protocol(),
            channel_buffer: default_channel_buffer(),
            send_timeout_ms: default_send_timeout_ms(),
            idle_timeout_secs: 0,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            secret: String::new(),
            backend: default_session_backend(),
            key_prefix: default_key_prefix(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8080);

        let ws = WebSocketConfig::default();
        assert_eq!(ws.allowed_origins, vec!["http://localhost:3000"]);
        assert_eq!(ws.protocol.as_deref(), Some("echo-protocol"));
        assert!(ws.idle_timeout().is_none());
        assert_eq!(ws.send_timeout(), Duration::from_secs(5));

        let session = SessionConfig::default();
        assert_eq!(session.cookie_name, "connect.sid");
        assert_eq!(session.key_prefix, "sess:");
        assert_eq!(session.lookup_timeout(), Some(Duration::from_secs(5)));

        assert!(ChatConfig::default().public_rooms.is_empty());
    }

    #[test]
    fn test_zero_timeouts_disable() {
        let ws = WebSocketConfig {
            idle_timeout_secs: 0,
            ..Default::default()
        };
        assert!(ws.idle_timeout().is_none());

        let session = SessionConfig {
            lookup_timeout_ms: 0,
            ..Default::default()
        };
        assert!(session.lookup_timeout().is_none());
    }
}
