//! Session backing store
//!
//! Trait-based abstraction over the external key-value service that maps
//! session tokens to identities. Lookups are asynchronous so a slow store
//! only ever stalls the handshake that issued the lookup.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::config::SessionConfig;
use crate::redis::RedisPool;

use super::{Identity, SessionToken};

/// Error type for session store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionStoreError {
    /// Backend could not be reached or the command failed
    #[error("Backend error: {0}")]
    Backend(String),
    /// The stored session document could not be parsed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Backend type for session store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStoreBackend {
    /// In-process map
    Memory,
    /// Session documents written to Redis by the HTTP layer
    Redis,
}

impl SessionStoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

/// Keyed lookup of the identity owning a session
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resolve a token. `Ok(None)` means the session is unknown, expired,
    /// or holds no identity.
    async fn get(&self, token: &SessionToken) -> Result<Option<Identity>, SessionStoreError>;

    /// Get the backend type
    fn backend_type(&self) -> SessionStoreBackend;
}

/// In-memory session store
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Identity>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, identity: impl Into<Identity>) {
        self.sessions.insert(token.into(), identity.into());
    }

    pub fn remove(&self, token: &str) -> Option<Identity> {
        self.sessions.remove(token).map(|(_, identity)| identity)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, token: &SessionToken) -> Result<Option<Identity>, SessionStoreError> {
        Ok(self.sessions.get(token.as_str()).map(|entry| entry.clone()))
    }

    fn backend_type(&self) -> SessionStoreBackend {
        SessionStoreBackend::Memory
    }
}

/// Session document as persisted by the HTTP session middleware.
/// Only the `user` field matters here.
#[derive(Debug, Deserialize)]
struct SessionDocument {
    #[serde(default)]
    user: Option<SessionUser>,
}

/// The HTTP layer stores either the bare uid or the full user record.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SessionUser {
    Uid(String),
    Record { uuid: String },
}

impl SessionUser {
    fn into_identity(self) -> Option<Identity> {
        let uid = match self {
            Self::Uid(uid) => uid,
            Self::Record { uuid } => uuid,
        };
        (!uid.is_empty()).then(|| Identity::from(uid))
    }
}

fn parse_session_document(json: &str) -> Result<Option<Identity>, SessionStoreError> {
    let document: SessionDocument = serde_json::from_str(json)
        .map_err(|e| SessionStoreError::Serialization(e.to_string()))?;
    Ok(document.user.and_then(SessionUser::into_identity))
}

/// Redis-backed session store reading `<prefix><token>` keys
pub struct RedisSessionStore {
    pool: Arc<RedisPool>,
    key_prefix: String,
}

impl RedisSessionStore {
    pub fn new(pool: Arc<RedisPool>, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
        }
    }

    fn session_key(&self, token: &SessionToken) -> String {
        format!("{}{}", self.key_prefix, token)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, token: &SessionToken) -> Result<Option<Identity>, SessionStoreError> {
        let json = self
            .pool
            .get_string(&self.session_key(token))
            .await
            .map_err(|e| SessionStoreError::Backend(e.to_string()))?;

        match json {
            Some(json) => parse_session_document(&json),
            None => Ok(None),
        }
    }

    fn backend_type(&self) -> SessionStoreBackend {
        SessionStoreBackend::Redis
    }
}

/// Create a session store based on configuration
pub fn create_session_store(
    config: &SessionConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn SessionStore> {
    if config.backend == "redis" {
        if let Some(pool) = redis_pool {
            tracing::info!(
                key_prefix = %config.key_prefix,
                "Creating Redis session store"
            );
            return Arc::new(RedisSessionStore::new(pool, config.key_prefix.clone()));
        }
        tracing::warn!("Redis session store requested but Redis pool not available, falling back to memory store");
    } else {
        tracing::info!("Using in-memory session store");
    }
    Arc::new(MemorySessionStore::new())
}
