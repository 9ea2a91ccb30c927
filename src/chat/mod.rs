//! Chat relay installed by the binary.
//!
//! `INIT` joins the listed rooms the [`RoomPolicy`] allows and answers with
//! the identity's rooms; `NEW_MESSAGE` is relayed to every other member of
//! the room.

mod policy;

pub use policy::{RoomGrants, RoomPolicy};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::broker::{Broker, BrokerHandler, CloseContext, MessageContext};
use crate::session::Identity;
use crate::websocket::{Envelope, OutboundMessage};

/// Messages sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Init {
        #[serde(default)]
        rooms: Vec<String>,
    },
    NewMessage {
        room: String,
        content: String,
    },
}

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Conversations {
        rooms: Vec<String>,
    },
    NewMessage {
        room: String,
        author: Identity,
        content: String,
    },
}

#[derive(Clone)]
pub struct ChatRelay {
    policy: Arc<dyn RoomPolicy>,
}

impl ChatRelay {
    pub fn new(policy: Arc<dyn RoomPolicy>) -> Self {
        Self { policy }
    }

    async fn handle_init(
        &self,
        broker: &Broker,
        ctx: &MessageContext,
        rooms: Vec<String>,
    ) -> anyhow::Result<()> {
        for room in rooms {
            if !is_valid_room_name(&room) {
                tracing::warn!(identity = %ctx.identity, room = %room, "Invalid room name");
                continue;
            }
            if broker.rooms().is_member(&room, &ctx.identity) {
                continue;
            }
            if !self.policy.can_join(&ctx.identity, &room).await {
                tracing::warn!(identity = %ctx.identity, room = %room, "Room join denied");
                continue;
            }
            broker.subscribe_to_room(&room, &ctx.identity);
        }

        let reply = ServerMessage::Conversations {
            rooms: broker.rooms().rooms_of(&ctx.identity),
        };
        let message = OutboundMessage::encode(&Envelope::from_message(&reply)?)?;
        ctx.connection.send(&message).await?;
        Ok(())
    }

    async fn handle_new_message(
        &self,
        broker: &Broker,
        ctx: &MessageContext,
        room: String,
        content: String,
    ) -> anyhow::Result<()> {
        if !broker.rooms().is_member(&room, &ctx.identity) {
            tracing::warn!(identity = %ctx.identity, room = %room, "Message to a room the author has not joined");
            return Ok(());
        }

        let message = ServerMessage::NewMessage {
            room: room.clone(),
            author: ctx.identity.clone(),
            content,
        };
        let result = broker
            .broadcast_to_room_exclusively(
                &room,
                &Envelope::from_message(&message)?,
                std::slice::from_ref(&ctx.identity),
            )
            .await;

        tracing::debug!(
            room = %room,
            delivered = result.delivered,
            failed = result.failed,
            "Relayed chat message"
        );
        Ok(())
    }
}

#[async_trait]
impl BrokerHandler for ChatRelay {
    #[tracing::instrument(
        name = "chat.message",
        skip_all,
        fields(connection_id = %ctx.connection.id, message_type = %ctx.message.kind)
    )]
    async fn on_message(&self, broker: &Broker, ctx: MessageContext) -> anyhow::Result<()> {
        let message = match ctx.message.decode::<ClientMessage>() {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Unrecognized chat message, ignoring");
                return Ok(());
            }
        };

        match message {
            ClientMessage::Init { rooms } => self.handle_init(broker, &ctx, rooms).await,
            ClientMessage::NewMessage { room, content } => {
                self.handle_new_message(broker, &ctx, room, content).await
            }
        }
    }

    async fn on_close(&self, _broker: &Broker, ctx: CloseContext) -> anyhow::Result<()> {
        tracing::debug!(
            identity = %ctx.identity,
            connection_id = %ctx.connection.id,
            code = ctx.reason.code,
            "Chat connection closed"
        );
        Ok(())
    }
}

/// Validate room name
fn is_valid_room_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }

    // Only allow alphanumeric, dash, underscore, and dot
    name.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebSocketConfig;
    use crate::session::{CookieSigner, MemorySessionStore, SessionResolver};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn broker() -> Broker {
        let resolver = SessionResolver::new(
            "connect.sid",
            CookieSigner::new("secret"),
            Arc::new(MemorySessionStore::new()),
            None,
        );
        Broker::new(WebSocketConfig::default(), resolver)
    }

    fn context(broker: &Broker, identity: &str, message: Envelope) -> (MessageContext, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(8);
        let connection = broker.registry().register(Identity::from(identity), tx);
        let ctx = MessageContext {
            identity: Identity::from(identity),
            connection,
            message,
        };
        (ctx, rx)
    }

    fn decode(message: &OutboundMessage) -> ServerMessage {
        Envelope::parse(message.as_str()).unwrap().decode().unwrap()
    }

    #[test]
    fn test_client_message_wire_format() {
        let envelope = Envelope::parse(r#"{"type":"INIT","payload":{"rooms":["a","b"]}}"#).unwrap();
        assert_eq!(
            envelope.decode::<ClientMessage>().unwrap(),
            ClientMessage::Init {
                rooms: vec!["a".into(), "b".into()]
            }
        );

        let envelope = Envelope::new("NEW_MESSAGE", json!({"room": "a", "content": "hi"}));
        assert_eq!(
            envelope.decode::<ClientMessage>().unwrap(),
            ClientMessage::NewMessage {
                room: "a".into(),
                content: "hi".into()
            }
        );
    }

    #[test]
    fn test_server_message_wire_format() {
        let envelope = Envelope::from_message(&ServerMessage::NewMessage {
            room: "a".into(),
            author: Identity::from("u1"),
            content: "hi".into(),
        })
        .unwrap();
        assert_eq!(envelope.kind, "NEW_MESSAGE");
        assert_eq!(envelope.payload, json!({"room": "a", "author": "u1", "content": "hi"}));
    }

    fn relay(grants: RoomGrants) -> ChatRelay {
        ChatRelay::new(Arc::new(grants))
    }

    #[tokio::test]
    async fn test_init_joins_rooms_and_replies() {
        let broker = broker();
        let grants = RoomGrants::new();
        grants.grant(&Identity::from("alice"), "r1");
        grants.grant(&Identity::from("alice"), "r2");
        let relay = relay(grants);
        let init = Envelope::new("INIT", json!({"rooms": ["r2", "r1", "bad room"]}));
        let (ctx, mut rx) = context(&broker, "alice", init);

        relay.on_message(&broker, ctx).await.unwrap();

        assert_eq!(
            decode(&rx.try_recv().unwrap()),
            ServerMessage::Conversations {
                rooms: vec!["r1".into(), "r2".into()]
            }
        );
        assert!(broker.rooms().is_member("r1", &Identity::from("alice")));
        assert_eq!(broker.rooms().room_count(), 2);
    }

    #[tokio::test]
    async fn test_init_cannot_join_ungranted_room() {
        let broker = broker();
        broker.subscribe_to_room("alice-bob", &Identity::from("alice"));
        broker.subscribe_to_room("alice-bob", &Identity::from("bob"));
        let grants = RoomGrants::with_public_rooms(["lobby"]);
        grants.grant(&Identity::from("alice"), "alice-bob");
        grants.grant(&Identity::from("bob"), "alice-bob");
        let relay = relay(grants);

        let init = Envelope::new("INIT", json!({"rooms": ["alice-bob", "lobby"]}));
        let (ctx, mut mallory_rx) = context(&broker, "mallory", init);
        relay.on_message(&broker, ctx).await.unwrap();

        assert_eq!(
            decode(&mallory_rx.try_recv().unwrap()),
            ServerMessage::Conversations {
                rooms: vec!["lobby".into()]
            }
        );
        assert!(!broker.rooms().is_member("alice-bob", &Identity::from("mallory")));

        let send = Envelope::new("NEW_MESSAGE", json!({"room": "alice-bob", "content": "secret"}));
        let (ctx, _alice_rx) = context(&broker, "alice", send);
        relay.on_message(&broker, ctx).await.unwrap();
        assert!(mallory_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_init_lists_rooms_already_held() {
        let broker = broker();
        broker.subscribe_to_room("match-7", &Identity::from("alice"));

        let init = Envelope::new("INIT", json!({"rooms": ["match-7"]}));
        let (ctx, mut rx) = context(&broker, "alice", init);
        relay(RoomGrants::new()).on_message(&broker, ctx).await.unwrap();

        assert_eq!(
            decode(&rx.try_recv().unwrap()),
            ServerMessage::Conversations {
                rooms: vec!["match-7".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_new_message_skips_author() {
        let broker = broker();
        let relay = relay(RoomGrants::new());
        broker.subscribe_to_room("r", &Identity::from("alice"));
        broker.subscribe_to_room("r", &Identity::from("bob"));

        let (_bob_ctx, mut bob_rx) = context(&broker, "bob", Envelope::new("PING", json!(null)));
        let send = Envelope::new("NEW_MESSAGE", json!({"room": "r", "content": "hello"}));
        let (ctx, mut alice_rx) = context(&broker, "alice", send);

        relay.on_message(&broker, ctx).await.unwrap();

        assert!(alice_rx.try_recv().is_err());
        assert_eq!(
            decode(&bob_rx.try_recv().unwrap()),
            ServerMessage::NewMessage {
                room: "r".into(),
                author: Identity::from("alice"),
                content: "hello".into()
            }
        );
    }

    #[tokio::test]
    async fn test_new_message_from_non_member_is_dropped() {
        let broker = broker();
        let relay = relay(RoomGrants::new());
        broker.subscribe_to_room("r", &Identity::from("bob"));
        let (_bob_ctx, mut bob_rx) = context(&broker, "bob", Envelope::new("PING", json!(null)));

        let send = Envelope::new("NEW_MESSAGE", json!({"room": "r", "content": "intrude"}));
        let (ctx, _rx) = context(&broker, "mallory", send);

        relay.on_message(&broker, ctx).await.unwrap();
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_type_is_ignored() {
        let broker = broker();
        let (ctx, mut rx) = context(&broker, "alice", Envelope::new("SHRUG", json!({})));

        relay(RoomGrants::new()).on_message(&broker, ctx).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_room_names() {
        assert!(is_valid_room_name("match-42"));
        assert!(is_valid_room_name("v1.lobby"));
        assert!(!is_valid_room_name(""));
        assert!(!is_valid_room_name("room/path"));
        assert!(!is_valid_room_name(&"a".repeat(65)));
    }
}
