use axum::{
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use crate::broker::Broker;

use super::Handshake;

/// WebSocket upgrade handler
///
/// Origin and session are checked before the upgrade; a rejected handshake
/// never reaches the connection registry.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(broker): State<Broker>,
    headers: HeaderMap,
) -> Response {
    let handshake = Handshake::from_headers(headers);

    let accepted = match broker.authorize(&handshake).await {
        Ok(accepted) => accepted,
        Err(e) => return e.into_response(),
    };

    let ws = match accepted.protocol {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    let identity = accepted.identity;
    ws.on_upgrade(move |socket| async move {
        broker.serve_connection(socket, identity).await;
    })
}
