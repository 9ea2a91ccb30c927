use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::broker::Broker;
use crate::metrics::HandshakeMetrics;
use crate::session::{Identity, SessionError};

/// Transport-neutral view of an upgrade request
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub origin: Option<String>,
    /// Sub-protocols offered by the client, in preference order
    pub protocols: Vec<String>,
    pub headers: HeaderMap,
}

impl Handshake {
    pub fn from_headers(headers: HeaderMap) -> Self {
        let origin = headers
            .get(header::ORIGIN)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let protocols = headers
            .get_all(header::SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            origin,
            protocols,
            headers,
        }
    }
}

/// Outcome of a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub identity: Identity,
    /// Sub-protocol to echo back on the upgrade response
    pub protocol: Option<String>,
}

/// Reasons a handshake is refused before the socket is upgraded.
///
/// Clients only ever see the status line and a generic body; the detail is
/// logged server-side.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("origin rejected: {origin:?}")]
    OriginRejected { origin: Option<String> },

    #[error("unsupported sub-protocol, offered {offered:?}")]
    UnsupportedProtocol { offered: Vec<String> },

    #[error("session resolution failed: {0}")]
    SessionResolutionFailed(#[from] SessionError),
}

impl HandshakeError {
    pub fn code(&self) -> &'static str {
        match self {
            HandshakeError::OriginRejected { .. } => "ORIGIN_REJECTED",
            HandshakeError::UnsupportedProtocol { .. } => "UNSUPPORTED_PROTOCOL",
            HandshakeError::SessionResolutionFailed(e) => e.code(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HandshakeError::OriginRejected { .. } => StatusCode::FORBIDDEN,
            HandshakeError::UnsupportedProtocol { .. } => StatusCode::BAD_REQUEST,
            HandshakeError::SessionResolutionFailed(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        let body = match self {
            HandshakeError::OriginRejected { .. } => "origin rejected",
            HandshakeError::UnsupportedProtocol { .. } => "unsupported protocol",
            HandshakeError::SessionResolutionFailed(_) => "unauthorized",
        };
        (self.status(), body).into_response()
    }
}

/// Pick the configured sub-protocol if the client offered it.
///
/// A client offering nothing is accepted without a protocol; a client
/// offering only other protocols is refused.
pub fn select_protocol(
    configured: Option<&str>,
    offered: &[String],
) -> Result<Option<String>, HandshakeError> {
    if offered.is_empty() {
        return Ok(None);
    }

    match configured {
        Some(protocol) if offered.iter().any(|p| p == protocol) => Ok(Some(protocol.to_string())),
        Some(_) => Err(HandshakeError::UnsupportedProtocol {
            offered: offered.to_vec(),
        }),
        None => Ok(None),
    }
}

impl Broker {
    /// Run the origin gate, then sub-protocol negotiation, then session
    /// resolution. The resolver is never consulted for a rejected origin.
    #[tracing::instrument(
        name = "ws.handshake",
        skip_all,
        fields(origin = handshake.origin.as_deref().unwrap_or("-"))
    )]
    pub async fn authorize(&self, handshake: &Handshake) -> Result<Accepted, HandshakeError> {
        match self.check(handshake).await {
            Ok(accepted) => {
                HandshakeMetrics::record_accepted();
                tracing::info!(identity = %accepted.identity, "Handshake accepted");
                Ok(accepted)
            }
            Err(e) => {
                HandshakeMetrics::record_rejected(e.code());
                tracing::warn!(code = e.code(), error = %e, "Handshake rejected");
                Err(e)
            }
        }
    }

    async fn check(&self, handshake: &Handshake) -> Result<Accepted, HandshakeError> {
        let origin_allowed = handshake
            .origin
            .as_deref()
            .is_some_and(|origin| self.gate().allowed(origin));
        if !origin_allowed {
            return Err(HandshakeError::OriginRejected {
                origin: handshake.origin.clone(),
            });
        }

        let protocol = select_protocol(
            self.websocket_config().protocol.as_deref(),
            &handshake.protocols,
        )?;

        let identity = self.resolver().resolve(&handshake.headers).await?;

        Ok(Accepted { identity, protocol })
    }
}
