//! Client session endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use super::ApiError;
use crate::api::state::AppState;
use crate::types::{ControlError, Session};

/// GET /api/clients - All live sessions, oldest connection first
pub async fn list_clients(State(state): State<Arc<AppState>>) -> Json<Vec<Session>> {
    Json(state.registry.list())
}

/// GET /api/clients/:id - One session
pub async fn get_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    state
        .registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| ControlError::UnknownSession(id).into())
}

/// Body returned after a forced disconnect
#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub disconnected: String,
}

/// POST /api/clients/:id/disconnect, DELETE /api/clients/:id
///
/// Removes the session and closes its WebSocket. Unknown ids are a 404,
/// so repeating the call is harmless.
pub async fn disconnect_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.registry.remove(&id) {
        Ok(Json(DisconnectResponse { disconnected: id }))
    } else {
        Err(ControlError::UnknownSession(id).into())
    }
}
