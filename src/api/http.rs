//! HTTP server setup with Axum

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use super::rest::{clients, history, status};
use super::sse::events_handler;
use super::state::AppState;
use super::websocket::ws_handler;

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    // Dashboards are served from other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Client WebSocket, keyed by the client's persisted id
        .route("/ws/:client_id", get(ws_handler))
        // Health check
        .route("/health", get(health_check))
        // Operator API
        .route("/api/clients", get(clients::list_clients))
        .route(
            "/api/clients/:id",
            get(clients::get_client).delete(clients::disconnect_client),
        )
        .route("/api/clients/:id/disconnect", post(clients::disconnect_client))
        .route("/api/status", get(status::get_status))
        .route("/api/connections/history", get(history::get_history))
        .route("/api/events", get(events_handler))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
