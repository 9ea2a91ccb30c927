use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::api_routes;

use super::AppState;

pub fn create_app(state: AppState) -> Router {
    // The broker router carries its own state
    let broker_routes = state.broker.router();

    Router::new()
        // Merge API routes
        .merge(api_routes())
        .with_state(state)
        // WebSocket endpoint
        .merge(broker_routes)
        // Add middleware
        .layer(TraceLayer::new_for_http())
}
