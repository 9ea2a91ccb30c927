use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics::MessageMetrics;
use crate::session::Identity;
use crate::websocket::{Envelope, OutboundMessage};

use super::{ConnectionHandle, ConnectionStats, DeliveryResult, SendError};

/// Maximum number of concurrent message sends
const MAX_CONCURRENT_SENDS: usize = 100;

/// Default upper bound on a single enqueue
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns every open connection, indexed by identity.
///
/// A connection appears under exactly one identity from `register` until
/// `unregister`.
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// identity -> Set<connection_id> (one per device)
    identity_index: DashMap<Identity, HashSet<Uuid>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_send_timeout(DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_send_timeout(send_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            identity_index: DashMap::new(),
            send_timeout,
        }
    }

    /// Register a new connection for an identity
    pub fn register(
        &self,
        identity: Identity,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(identity, sender, self.send_timeout));
        let conn_id = handle.id;

        self.identity_index
            .entry(handle.identity.clone())
            .or_default()
            .insert(conn_id);
        self.connections.insert(conn_id, handle.clone());

        tracing::info!(connection_id = %conn_id, identity = %handle.identity, "Connection registered");

        handle
    }

    /// Unregister a connection. Returns false if it was already gone.
    pub fn unregister(&self, connection_id: Uuid) -> bool {
        let Some((_, handle)) = self.connections.remove(&connection_id) else {
            return false;
        };

        if let Some(mut conns) = self.identity_index.get_mut(&handle.identity) {
            conns.remove(&connection_id);
        }
        self.identity_index
            .remove_if(&handle.identity, |_, conns| conns.is_empty());

        tracing::info!(connection_id = %connection_id, identity = %handle.identity, "Connection unregistered");
        true
    }

    /// Get all connections for an identity
    pub fn connections_for(&self, identity: &Identity) -> Vec<Arc<ConnectionHandle>> {
        self.identity_index
            .get(identity)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get connection by ID
    pub fn get(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn is_connected(&self, identity: &Identity) -> bool {
        self.identity_index.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            total_connections: self.connections.len(),
            unique_identities: self.identity_index.len(),
        }
    }

    /// Send to every open connection of every listed identity.
    ///
    /// Best effort: a failing connection is logged and skipped. Identities
    /// without connections are skipped; nothing is buffered for them.
    #[tracing::instrument(
        name = "registry.broadcast",
        skip(self, identities, envelope),
        fields(message_type = %envelope.kind, identity_count = identities.len())
    )]
    pub async fn broadcast_to_identities(
        &self,
        identities: &[Identity],
        envelope: &Envelope,
    ) -> DeliveryResult {
        let mut seen = HashSet::new();
        let targets: Vec<Arc<ConnectionHandle>> = identities
            .iter()
            .flat_map(|identity| self.connections_for(identity))
            .filter(|conn| seen.insert(conn.id))
            .collect();

        if targets.is_empty() {
            return DeliveryResult::default();
        }

        // Serialize once, share across all connections
        let message = match OutboundMessage::encode(envelope) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return DeliveryResult::new(0, targets.len());
            }
        };

        let result = send_to_connections(&targets, &message).await;

        MessageMetrics::record_delivered(result.delivered as u64);
        MessageMetrics::record_failed(result.failed as u64);

        tracing::debug!(
            delivered = result.delivered,
            failed = result.failed,
            "Broadcast to identities completed"
        );

        result
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Send to a list of connections concurrently with bounded parallelism
async fn send_to_connections(
    connections: &[Arc<ConnectionHandle>],
    message: &OutboundMessage,
) -> DeliveryResult {
    // Futures own their handle and message
    stream::iter(connections.iter().cloned())
        .map(|conn| {
            let message = message.clone();
            async move {
                let outcome = conn.send(&message).await;
                (conn, outcome)
            }
        })
        .buffer_unordered(MAX_CONCURRENT_SENDS)
        .fold(DeliveryResult::default(), |mut result, (conn, outcome)| async move {
            match outcome {
                Ok(()) => result.delivered += 1,
                Err(e) => {
                    log_send_failure(&conn, e);
                    result.failed += 1;
                }
            }
            result
        })
        .await
}

fn log_send_failure(conn: &ConnectionHandle, error: SendError) {
    tracing::warn!(
        connection_id = %conn.id,
        identity = %conn.identity,
        error = %error,
        "Failed to send to connection"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel() -> (mpsc::Sender<OutboundMessage>, mpsc::Receiver<OutboundMessage>) {
        mpsc::channel(16)
    }

    fn message(text: &str) -> Envelope {
        Envelope::new("NEW_MESSAGE", json!(text))
    }

    #[test]
    fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let alice = Identity::from("alice");

        let c1 = registry.register(alice.clone(), tx1);
        let c2 = registry.register(alice.clone(), tx2);

        assert_eq!(registry.connections_for(&alice).len(), 2);
        assert_eq!(
            registry.stats(),
            ConnectionStats {
                total_connections: 2,
                unique_identities: 1
            }
        );

        assert!(registry.unregister(c1.id));
        let remaining = registry.connections_for(&alice);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, c2.id);

        assert!(registry.unregister(c2.id));
        assert!(!registry.is_connected(&alice));
        assert!(registry.is_empty());
        assert_eq!(registry.stats(), ConnectionStats::default());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let conn = registry.register(Identity::from("alice"), tx);

        assert!(registry.unregister(conn.id));
        assert!(!registry.unregister(conn.id));
        assert!(!registry.unregister(Uuid::new_v4()));
        assert_eq!(registry.stats(), ConnectionStats::default());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_listed_identities() {
        let registry = ConnectionRegistry::new();
        let (tx_a1, mut rx_a1) = channel();
        let (tx_a2, mut rx_a2) = channel();
        let (tx_b, mut rx_b) = channel();
        registry.register(Identity::from("a"), tx_a1);
        registry.register(Identity::from("a"), tx_a2);
        registry.register(Identity::from("b"), tx_b);

        let result = registry
            .broadcast_to_identities(&[Identity::from("a")], &message("hi"))
            .await;

        assert_eq!(result, DeliveryResult::new(2, 0));
        assert!(rx_a1.try_recv().is_ok());
        assert!(rx_a2.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_deduplicates_identities() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = channel();
        registry.register(Identity::from("a"), tx);

        let a = Identity::from("a");
        let result = registry
            .broadcast_to_identities(&[a.clone(), a], &message("once"))
            .await;

        assert_eq!(result.delivered, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_send_does_not_stop_fan_out() {
        let registry = ConnectionRegistry::new();
        let (tx_dead, rx_dead) = channel();
        let (tx_live, mut rx_live) = channel();
        registry.register(Identity::from("a"), tx_dead);
        registry.register(Identity::from("b"), tx_live);
        drop(rx_dead);

        let result = registry
            .broadcast_to_identities(
                &[Identity::from("a"), Identity::from("b")],
                &message("still delivered"),
            )
            .await;

        assert_eq!(result, DeliveryResult::new(1, 1));
        let received = rx_live.try_recv().unwrap();
        assert!(received.as_str().contains("still delivered"));
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_identity_is_noop() {
        let registry = ConnectionRegistry::new();
        let result = registry
            .broadcast_to_identities(&[Identity::from("ghost")], &message("hi"))
            .await;
        assert_eq!(result, DeliveryResult::default());
    }
}
