//! Named rooms of identities.
//!
//! Membership is keyed by identity, not by connection: an identity stays a
//! member while it has no open connection, and messages addressed to it in
//! that state are dropped. Members leave only through an explicit
//! unsubscribe.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::connection_manager::{ConnectionRegistry, DeliveryResult};
use crate::session::Identity;
use crate::websocket::Envelope;

/// Room statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoomStats {
    pub total_rooms: usize,
    /// room -> member count
    pub rooms: HashMap<String, usize>,
}

/// room name -> member identities
#[derive(Default)]
pub struct RoomIndex {
    rooms: DashMap<String, HashSet<Identity>>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity to a room. Returns false if it already was a member.
    pub fn subscribe(&self, room: &str, identity: &Identity) -> bool {
        let added = self
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(identity.clone());

        if added {
            tracing::debug!(room = %room, identity = %identity, "Subscribed to room");
        }
        added
    }

    /// Remove an identity from a room. Returns false if it was not a member.
    pub fn unsubscribe(&self, room: &str, identity: &Identity) -> bool {
        let removed = self
            .rooms
            .get_mut(room)
            .map(|mut members| members.remove(identity))
            .unwrap_or(false);
        self.rooms.remove_if(room, |_, members| members.is_empty());

        if removed {
            tracing::debug!(room = %room, identity = %identity, "Unsubscribed from room");
        }
        removed
    }

    /// Remove an identity from every room. Returns the number of rooms left.
    pub fn unsubscribe_all(&self, identity: &Identity) -> usize {
        let mut left = 0;
        for mut entry in self.rooms.iter_mut() {
            if entry.value_mut().remove(identity) {
                left += 1;
            }
        }
        self.rooms.retain(|_, members| !members.is_empty());

        tracing::debug!(identity = %identity, rooms = left, "Left all rooms");
        left
    }

    pub fn members(&self, room: &str) -> Vec<Identity> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room: &str, identity: &Identity) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(identity))
            .unwrap_or(false)
    }

    /// Names of the rooms an identity belongs to, sorted
    pub fn rooms_of(&self, identity: &Identity) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().contains(identity))
            .map(|entry| entry.key().clone())
            .collect();
        rooms.sort();
        rooms
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn stats(&self) -> RoomStats {
        let rooms: HashMap<String, usize> = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect();

        RoomStats {
            total_rooms: rooms.len(),
            rooms,
        }
    }

    /// Deliver to every member of `room` not listed in `excluding`.
    /// An unknown or empty room delivers nothing.
    #[tracing::instrument(
        name = "rooms.broadcast",
        skip(self, envelope, excluding, registry),
        fields(message_type = %envelope.kind, excluded = excluding.len())
    )]
    pub async fn broadcast_to_room(
        &self,
        room: &str,
        envelope: &Envelope,
        excluding: &[Identity],
        registry: &ConnectionRegistry,
    ) -> DeliveryResult {
        let targets: Vec<Identity> = self
            .members(room)
            .into_iter()
            .filter(|member| !excluding.contains(member))
            .collect();

        if targets.is_empty() {
            tracing::debug!(room = %room, "No recipients in room");
            return DeliveryResult::default();
        }

        registry.broadcast_to_identities(&targets, envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn id(s: &str) -> Identity {
        Identity::from(s)
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let rooms = RoomIndex::new();
        assert!(rooms.subscribe("lobby", &id("a")));
        assert!(!rooms.subscribe("lobby", &id("a")));
        assert_eq!(rooms.members("lobby"), vec![id("a")]);
    }

    #[test]
    fn test_subscribe_then_unsubscribe_restores_state() {
        let rooms = RoomIndex::new();
        rooms.subscribe("lobby", &id("a"));
        let before = rooms.members("lobby");

        rooms.subscribe("lobby", &id("b"));
        rooms.unsubscribe("lobby", &id("b"));

        assert_eq!(rooms.members("lobby"), before);
    }

    #[test]
    fn test_unsubscribe_absent_is_noop() {
        let rooms = RoomIndex::new();
        assert!(!rooms.unsubscribe("nowhere", &id("a")));

        rooms.subscribe("lobby", &id("a"));
        assert!(!rooms.unsubscribe("lobby", &id("b")));
        assert_eq!(rooms.room_count(), 1);
    }

    #[test]
    fn test_empty_rooms_are_pruned() {
        let rooms = RoomIndex::new();
        rooms.subscribe("lobby", &id("a"));
        rooms.unsubscribe("lobby", &id("a"));
        assert_eq!(rooms.room_count(), 0);
        assert!(rooms.members("lobby").is_empty());
    }

    #[test]
    fn test_unsubscribe_all() {
        let rooms = RoomIndex::new();
        rooms.subscribe("r1", &id("a"));
        rooms.subscribe("r2", &id("a"));
        rooms.subscribe("r2", &id("b"));

        assert_eq!(rooms.rooms_of(&id("a")), vec!["r1", "r2"]);
        assert_eq!(rooms.unsubscribe_all(&id("a")), 2);
        assert!(rooms.rooms_of(&id("a")).is_empty());
        assert_eq!(rooms.members("r2"), vec![id("b")]);
        assert_eq!(rooms.room_count(), 1);
    }

    #[test]
    fn test_stats() {
        let rooms = RoomIndex::new();
        rooms.subscribe("r1", &id("a"));
        rooms.subscribe("r1", &id("b"));
        rooms.subscribe("r2", &id("a"));

        let stats = rooms.stats();
        assert_eq!(stats.total_rooms, 2);
        assert_eq!(stats.rooms.get("r1"), Some(&2));
        assert_eq!(stats.rooms.get("r2"), Some(&1));
    }

    #[tokio::test]
    async fn test_broadcast_excludes_listed_members() {
        let rooms = RoomIndex::new();
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.register(id("a"), tx_a);
        registry.register(id("b"), tx_b);
        rooms.subscribe("r", &id("a"));
        rooms.subscribe("r", &id("b"));

        let envelope = Envelope::new("NEW_MESSAGE", json!("hi"));
        let result = rooms
            .broadcast_to_room("r", &envelope, &[id("a")], &registry)
            .await;

        assert_eq!(result.delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_room() {
        let rooms = RoomIndex::new();
        let registry = ConnectionRegistry::new();
        let envelope = Envelope::new("NEW_MESSAGE", json!("hi"));

        let result = rooms.broadcast_to_room("nowhere", &envelope, &[], &registry).await;
        assert_eq!(result, DeliveryResult::default());
    }
}
