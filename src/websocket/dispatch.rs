//! Per-connection lifecycle: register, pump frames into the installed
//! handler until the transport closes, then unregister and report the close.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::broker::{Broker, CloseContext, MessageContext};
use crate::connection_manager::ConnectionHandle;
use crate::metrics::MessageMetrics;
use crate::session::Identity;

use super::{Envelope, OutboundMessage};

/// Going away (RFC 6455)
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// No status code in the peer's close frame
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Transport dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// How long the writer gets to flush a server-initiated close frame
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseReason {
    pub code: u16,
    pub description: String,
}

impl CloseReason {
    pub fn new(code: u16, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn abnormal() -> Self {
        Self::new(CLOSE_ABNORMAL, "connection dropped")
    }

    pub fn idle_timeout() -> Self {
        Self::new(CLOSE_GOING_AWAY, "idle timeout")
    }

    fn from_frame(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self::new(frame.code, frame.reason.as_str()),
            None => Self::new(CLOSE_NO_STATUS, ""),
        }
    }

    fn to_frame(&self) -> CloseFrame {
        CloseFrame {
            code: self.code,
            reason: self.description.clone().into(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.description)
    }
}

impl Broker {
    /// Serve one accepted connection until it closes.
    ///
    /// Generic over the socket so it runs on an upgraded axum socket as well
    /// as on any in-process `Stream + Sink` pair.
    #[tracing::instrument(name = "ws.connection", skip_all, fields(identity = %identity))]
    pub async fn serve_connection<S, E>(&self, socket: S, identity: Identity) -> CloseReason
    where
        S: Stream<Item = Result<Message, E>> + Sink<Message> + Send + 'static,
        E: fmt::Display,
    {
        let config = self.websocket_config();
        let (tx, rx) = mpsc::channel::<OutboundMessage>(config.channel_buffer.max(1));
        let idle_timeout = config.idle_timeout();

        let handle = self.registry().register(identity.clone(), tx);
        let connection_id = handle.id;
        let connection_start = std::time::Instant::now();

        let (sink, mut stream) = socket.split();
        let (close_tx, close_rx) = oneshot::channel();
        let mut writer = tokio::spawn(write_outbound(sink, rx, close_rx));

        tracing::info!(connection_id = %connection_id, "WebSocket connection established");

        let reason = loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => break CloseReason::idle_timeout(),
                },
                None => stream.next().await,
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    handle.update_activity();
                    self.dispatch_text(&handle, text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    handle.update_activity();
                    MessageMetrics::record_malformed();
                    tracing::warn!(
                        connection_id = %connection_id,
                        "Binary frames are not supported, ignoring"
                    );
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    handle.update_activity();
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(connection_id = %connection_id, "Received close frame");
                    break CloseReason::from_frame(frame);
                }
                Some(Err(e)) => {
                    tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                    break CloseReason::abnormal();
                }
                None => break CloseReason::abnormal(),
            }
        };

        self.registry().unregister(connection_id);

        // Only a server-initiated close needs a frame; otherwise the peer is
        // already gone or the transport answers its close itself.
        let frame = (reason.code == CLOSE_GOING_AWAY).then(|| reason.to_frame());
        let _ = close_tx.send(frame);
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
            .await
            .is_err()
        {
            writer.abort();
        }

        tracing::info!(
            connection_id = %connection_id,
            code = reason.code,
            reason = %reason.description,
            duration_secs = connection_start.elapsed().as_secs_f64(),
            "WebSocket connection closed"
        );

        if let Some(handler) = self.handler() {
            let ctx = CloseContext {
                identity,
                connection: handle,
                reason: reason.clone(),
            };
            if let Err(e) = handler.on_close(self, ctx).await {
                tracing::warn!(connection_id = %connection_id, error = %e, "Close handler failed");
            }
        }

        reason
    }

    async fn dispatch_text(&self, handle: &Arc<ConnectionHandle>, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                MessageMetrics::record_malformed();
                tracing::warn!(connection_id = %handle.id, error = %e, "Malformed message, ignoring");
                return;
            }
        };
        MessageMetrics::record_received();

        let Some(handler) = self.handler() else {
            tracing::debug!(
                connection_id = %handle.id,
                message_type = %envelope.kind,
                "No handler installed, dropping message"
            );
            return;
        };

        let message_type = envelope.kind.clone();
        let ctx = MessageContext {
            identity: handle.identity.clone(),
            connection: handle.clone(),
            message: envelope,
        };
        if let Err(e) = handler.on_message(self, ctx).await {
            tracing::warn!(
                connection_id = %handle.id,
                message_type = %message_type,
                error = %e,
                "Message handler failed"
            );
        }
    }
}

/// Drain the connection's queue into the socket until the queue closes,
/// the socket fails, or a close is requested.
async fn write_outbound<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut close_rx: oneshot::Receiver<Option<CloseFrame>>,
) where
    W: Sink<Message> + Unpin,
{
    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if sink.send(Message::Text(msg.as_str().to_owned().into())).await.is_err() {
                    break;
                }
            }
            close = &mut close_rx => {
                if let Ok(Some(frame)) = close {
                    let _ = sink.send(Message::Close(Some(frame))).await;
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerHandler;
    use crate::config::WebSocketConfig;
    use crate::session::{CookieSigner, MemorySessionStore, SessionResolver};
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::sync::Mutex;

    /// In-process socket: frames pushed on `incoming` are read by the
    /// broker, frames the broker writes land on `outgoing`.
    struct MockSocket {
        incoming: fmpsc::UnboundedReceiver<Result<Message, std::io::Error>>,
        outgoing: fmpsc::UnboundedSender<Message>,
    }

    impl Stream for MockSocket {
        type Item = Result<Message, std::io::Error>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.incoming).poll_next(cx)
        }
    }

    impl Sink<Message> for MockSocket {
        type Error = fmpsc::SendError;

        fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Pin::new(&mut self.outgoing).poll_ready(cx)
        }

        fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            Pin::new(&mut self.outgoing).start_send(item)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Pin::new(&mut self.outgoing).poll_flush(cx)
        }

        fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Pin::new(&mut self.outgoing).poll_close(cx)
        }
    }

    type Client = (
        fmpsc::UnboundedSender<Result<Message, std::io::Error>>,
        fmpsc::UnboundedReceiver<Message>,
    );

    fn mock_socket() -> (MockSocket, Client) {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::unbounded();
        (
            MockSocket {
                incoming: in_rx,
                outgoing: out_tx,
            },
            (in_tx, out_rx),
        )
    }

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<(Identity, Envelope)>>,
        closes: Mutex<Vec<CloseReason>>,
    }

    #[async_trait]
    impl BrokerHandler for Recorder {
        async fn on_message(&self, _broker: &Broker, ctx: MessageContext) -> anyhow::Result<()> {
            if ctx.message.kind == "FAIL" {
                anyhow::bail!("handler refused message");
            }
            self.messages.lock().await.push((ctx.identity, ctx.message));
            Ok(())
        }

        async fn on_close(&self, _broker: &Broker, ctx: CloseContext) -> anyhow::Result<()> {
            self.closes.lock().await.push(ctx.reason);
            Ok(())
        }
    }

    fn broker(config: WebSocketConfig) -> Broker {
        let resolver = SessionResolver::new(
            "connect.sid",
            CookieSigner::new("secret"),
            Arc::new(MemorySessionStore::new()),
            None,
        );
        Broker::new(config, resolver)
    }

    fn text(s: &str) -> Result<Message, std::io::Error> {
        Ok(Message::Text(s.to_owned().into()))
    }

    #[tokio::test]
    async fn test_messages_reach_handler_and_malformed_frames_are_skipped() {
        let broker = broker(WebSocketConfig::default());
        let recorder = Arc::new(Recorder::default());
        broker.setup(recorder.clone()).unwrap();

        let (socket, (client_tx, _client_rx)) = mock_socket();
        client_tx.unbounded_send(text("not json")).unwrap();
        client_tx
            .unbounded_send(Ok(Message::Binary(vec![1u8, 2, 3].into())))
            .unwrap();
        client_tx.unbounded_send(text(r#"{"type":"FAIL"}"#)).unwrap();
        client_tx
            .unbounded_send(text(r#"{"type":"INIT","payload":{"rooms":["r1"]}}"#))
            .unwrap();
        client_tx
            .unbounded_send(Ok(Message::Close(Some(CloseFrame {
                code: 1000,
                reason: "bye".to_string().into(),
            }))))
            .unwrap();

        let reason = broker.serve_connection(socket, Identity::from("alice")).await;

        assert_eq!(reason, CloseReason::new(1000, "bye"));
        let messages = recorder.messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Identity::from("alice"));
        assert_eq!(messages[0].1.kind, "INIT");
        assert_eq!(*recorder.closes.lock().await, vec![CloseReason::new(1000, "bye")]);
        assert!(broker.registry().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_transport_is_abnormal_close() {
        let broker = broker(WebSocketConfig::default());
        let recorder = Arc::new(Recorder::default());
        broker.setup(recorder.clone()).unwrap();

        let (socket, (client_tx, _client_rx)) = mock_socket();
        drop(client_tx);

        let reason = broker.serve_connection(socket, Identity::from("alice")).await;
        assert_eq!(reason.code, CLOSE_ABNORMAL);
        assert_eq!(recorder.closes.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_outbound_messages_are_written_to_socket() {
        let broker = broker(WebSocketConfig::default());
        let (socket, (client_tx, mut client_rx)) = mock_socket();

        let serving = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.serve_connection(socket, Identity::from("bob")).await })
        };

        while !broker.registry().is_connected(&Identity::from("bob")) {
            tokio::task::yield_now().await;
        }
        broker
            .broadcast_to_identities(&[Identity::from("bob")], &Envelope::new("NEW_MESSAGE", "hi"))
            .await;

        let frame = client_rx.next().await.unwrap();
        match frame {
            Message::Text(text) => assert!(text.as_str().contains("\"NEW_MESSAGE\"")),
            other => panic!("unexpected frame {other:?}"),
        }

        drop(client_tx);
        serving.await.unwrap();
        assert!(!broker.registry().is_connected(&Identity::from("bob")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_closes_with_going_away() {
        let config = WebSocketConfig {
            idle_timeout_secs: 30,
            ..WebSocketConfig::default()
        };
        let broker = broker(config);
        let (socket, (_client_tx, mut client_rx)) = mock_socket();

        let reason = broker.serve_connection(socket, Identity::from("carol")).await;

        assert_eq!(reason, CloseReason::idle_timeout());
        match client_rx.next().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, CLOSE_GOING_AWAY);
                assert_eq!(frame.reason.as_str(), "idle timeout");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_messages_before_setup_are_dropped() {
        let broker = broker(WebSocketConfig::default());
        let (socket, (client_tx, _client_rx)) = mock_socket();
        client_tx.unbounded_send(text(r#"{"type":"INIT"}"#)).unwrap();
        drop(client_tx);

        let reason = broker.serve_connection(socket, Identity::from("dave")).await;
        assert_eq!(reason.code, CLOSE_ABNORMAL);
        assert!(broker.registry().is_empty());
    }
}
