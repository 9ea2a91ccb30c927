//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::rooms::RoomStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub session_store: SessionStoreHealthResponse,
    pub websocket: WebSocketHealthResponse,
    pub connections: ConnectionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct WebSocketHealthResponse {
    pub allowed_origins: Vec<String>,
    pub protocol: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionStoreHealthResponse {
    pub backend: String,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub total: usize,
    pub unique_identities: usize,
    pub rooms_count: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: ConnectionStatsResponse,
    pub rooms: RoomStats,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStatsResponse {
    pub total_connections: usize,
    pub unique_identities: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = state.start_time.elapsed().as_secs();
    let conn_stats = state.broker.registry().stats();

    // Memory store is always reachable; Redis is pinged
    let store_connected = match state.redis {
        Some(ref pool) => match pool.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Session store ping failed");
                false
            }
        },
        None => true,
    };

    let status = if store_connected { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        session_store: SessionStoreHealthResponse {
            backend: state.session_backend.as_str().to_string(),
            connected: store_connected,
        },
        websocket: WebSocketHealthResponse {
            allowed_origins: state.settings.websocket.allowed_origins.clone(),
            protocol: state.settings.websocket.protocol.clone(),
        },
        connections: ConnectionHealthResponse {
            total: conn_stats.total_connections,
            unique_identities: conn_stats.unique_identities,
            rooms_count: state.broker.rooms().room_count(),
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let conn_stats = state.broker.registry().stats();

    Json(StatsResponse {
        connections: ConnectionStatsResponse {
            total_connections: conn_stats.total_connections,
            unique_identities: conn_stats.unique_identities,
        },
        rooms: state.broker.rooms().stats(),
    })
}
