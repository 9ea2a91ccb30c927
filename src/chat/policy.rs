//! Who may join which chat room.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::config::ChatConfig;
use crate::session::Identity;

/// Consulted before an `INIT` subscribes an identity to a room.
#[async_trait]
pub trait RoomPolicy: Send + Sync {
    async fn can_join(&self, identity: &Identity, room: &str) -> bool;
}

/// Explicit per-identity grants plus a set of rooms open to everyone.
///
/// Denies any room that is neither public nor granted.
#[derive(Debug, Default)]
pub struct RoomGrants {
    public: HashSet<String>,
    grants: DashMap<Identity, HashSet<String>>,
}

impl RoomGrants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_public_rooms<I, S>(rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            public: rooms.into_iter().map(Into::into).collect(),
            grants: DashMap::new(),
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::with_public_rooms(config.public_rooms.iter().cloned())
    }

    /// Allow `identity` to join `room`. Returns false if already granted.
    pub fn grant(&self, identity: &Identity, room: impl Into<String>) -> bool {
        self.grants
            .entry(identity.clone())
            .or_default()
            .insert(room.into())
    }

    /// Withdraw a grant. Existing subscriptions are left alone.
    pub fn revoke(&self, identity: &Identity, room: &str) -> bool {
        let removed = self
            .grants
            .get_mut(identity)
            .map(|mut rooms| rooms.remove(room))
            .unwrap_or(false);
        self.grants.remove_if(identity, |_, rooms| rooms.is_empty());
        removed
    }

    pub fn is_public(&self, room: &str) -> bool {
        self.public.contains(room)
    }

    pub fn is_granted(&self, identity: &Identity, room: &str) -> bool {
        self.grants
            .get(identity)
            .is_some_and(|rooms| rooms.contains(room))
    }
}

#[async_trait]
impl RoomPolicy for RoomGrants {
    async fn can_join(&self, identity: &Identity, room: &str) -> bool {
        self.is_public(room) || self.is_granted(identity, room)
    }
}
