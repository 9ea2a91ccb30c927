//! Prometheus metrics endpoint.

use axum::{extract::State, http::header, response::IntoResponse};

use crate::error::Result;
use crate::metrics::{self, CONNECTIONS_TOTAL, IDENTITIES_CONNECTED, ROOMS_ACTIVE};
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> Result<impl IntoResponse> {
    update_metrics_from_state(&state);

    let output = metrics::encode_metrics()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        output,
    ))
}

/// Refresh the gauges that mirror live broker state
fn update_metrics_from_state(state: &AppState) {
    let conn_stats = state.broker.registry().stats();
    CONNECTIONS_TOTAL.set(conn_stats.total_connections as i64);
    IDENTITIES_CONNECTED.set(conn_stats.unique_identities as i64);
    ROOMS_ACTIVE.set(state.broker.rooms().room_count() as i64);
}
