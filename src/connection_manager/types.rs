//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::session::Identity;
use crate::websocket::OutboundMessage;

/// Handle for a single live connection.
///
/// The socket itself is owned by the connection's writer task; the handle
/// only holds the sending half of that task's queue.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub identity: Identity,
    pub sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
    send_timeout: Duration,
}

impl ConnectionHandle {
    pub fn new(
        identity: Identity,
        sender: mpsc::Sender<OutboundMessage>,
        send_timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            identity,
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            send_timeout,
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    /// Queue a message for this connection's socket.
    pub async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        match timeout(self.send_timeout, self.sender.send(message.clone())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Closed),
            Err(_) => Err(SendError::TimedOut),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Per-connection send failure. Never fatal to a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error("send timed out")]
    TimedOut,
}
