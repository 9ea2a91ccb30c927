//! Broker facade.
//!
//! A [`Broker`] owns the connection registry, the room index, the origin
//! gate and the session resolver. Application logic installs a
//! [`BrokerHandler`] once through [`Broker::setup`] and then drives rooms and
//! fan-out exclusively through the facade methods.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::{routing::get, Router};

use crate::config::{Settings, WebSocketConfig};
use crate::connection_manager::{ConnectionHandle, ConnectionRegistry, DeliveryResult};
use crate::rooms::RoomIndex;
use crate::session::{Identity, SessionResolver, SessionStore};
use crate::websocket::{ws_handler, CloseReason, Envelope, OriginGate};

/// Inbound message handed to the application
#[derive(Clone)]
pub struct MessageContext {
    pub identity: Identity,
    pub connection: Arc<ConnectionHandle>,
    pub message: Envelope,
}

/// Connection that has just been unregistered
#[derive(Clone)]
pub struct CloseContext {
    pub identity: Identity,
    pub connection: Arc<ConnectionHandle>,
    pub reason: CloseReason,
}

/// Application callbacks.
///
/// Errors are logged by the dispatch loop and never close the connection.
#[async_trait]
pub trait BrokerHandler: Send + Sync {
    async fn on_message(&self, broker: &Broker, ctx: MessageContext) -> anyhow::Result<()>;

    async fn on_close(&self, _broker: &Broker, _ctx: CloseContext) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker handler is already configured")]
    AlreadyConfigured,
}

struct BrokerInner {
    registry: ConnectionRegistry,
    rooms: RoomIndex,
    gate: OriginGate,
    resolver: SessionResolver,
    config: WebSocketConfig,
    handler: OnceLock<Arc<dyn BrokerHandler>>,
}

/// Cheaply clonable handle to the broker state
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(config: WebSocketConfig, resolver: SessionResolver) -> Self {
        let gate = OriginGate::new(config.allowed_origins.clone());
        if gate.origins().is_empty() {
            tracing::warn!("Origin allow-list is empty, every handshake will be rejected");
        }

        Self {
            inner: Arc::new(BrokerInner {
                registry: ConnectionRegistry::with_send_timeout(config.send_timeout()),
                rooms: RoomIndex::new(),
                gate,
                resolver,
                config,
                handler: OnceLock::new(),
            }),
        }
    }

    pub fn from_settings(settings: &Settings, store: Arc<dyn SessionStore>) -> Self {
        let resolver = SessionResolver::from_config(&settings.session, store);
        Self::new(settings.websocket.clone(), resolver)
    }

    /// Install the application callbacks. Only the first call succeeds.
    pub fn setup(&self, handler: Arc<dyn BrokerHandler>) -> Result<(), BrokerError> {
        self.inner
            .handler
            .set(handler)
            .map_err(|_| BrokerError::AlreadyConfigured)?;
        tracing::info!("Broker handler installed");
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.inner.handler.get().is_some()
    }

    pub(crate) fn handler(&self) -> Option<&Arc<dyn BrokerHandler>> {
        self.inner.handler.get()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn rooms(&self) -> &RoomIndex {
        &self.inner.rooms
    }

    pub fn gate(&self) -> &OriginGate {
        &self.inner.gate
    }

    pub fn resolver(&self) -> &SessionResolver {
        &self.inner.resolver
    }

    pub fn websocket_config(&self) -> &WebSocketConfig {
        &self.inner.config
    }

    pub fn subscribe_to_room(&self, room: &str, identity: &Identity) -> bool {
        self.inner.rooms.subscribe(room, identity)
    }

    pub fn unsubscribe_from_room(&self, room: &str, identity: &Identity) -> bool {
        self.inner.rooms.unsubscribe(room, identity)
    }

    /// Leave every room, e.g. on logout. Disconnecting never does this.
    pub fn unsubscribe_from_all_rooms(&self, identity: &Identity) -> usize {
        self.inner.rooms.unsubscribe_all(identity)
    }

    pub async fn broadcast_to_room(&self, room: &str, envelope: &Envelope) -> DeliveryResult {
        self.broadcast_to_room_exclusively(room, envelope, &[]).await
    }

    pub async fn broadcast_to_room_exclusively(
        &self,
        room: &str,
        envelope: &Envelope,
        excluding: &[Identity],
    ) -> DeliveryResult {
        self.inner
            .rooms
            .broadcast_to_room(room, envelope, excluding, &self.inner.registry)
            .await
    }

    pub async fn broadcast_to_identities(
        &self,
        identities: &[Identity],
        envelope: &Envelope,
    ) -> DeliveryResult {
        self.inner
            .registry
            .broadcast_to_identities(identities, envelope)
            .await
    }

    /// `GET /ws`, with the broker as router state
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(self.clone())
    }
}
