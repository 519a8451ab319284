//! Aggregate status endpoint

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ApiError, HoursParams};
use crate::api::state::AppState;
use crate::types::HistorySample;
use crate::utils::format_uptime;

/// Response for GET /api/status
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub active_clients: usize,
    pub max_connections: usize,
    pub uptime_seconds: u64,
    /// Human-readable uptime, e.g. `2h 5m 0s`
    pub uptime: String,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub ping_timeout: u64,
    pub ssl_enabled: bool,
    /// Samples covering the requested `hours`
    pub history: Vec<HistorySample>,
}

/// GET /api/status?hours=1
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HoursParams>, QueryRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Query(params) = query?;
    let uptime_seconds = state.uptime_secs();
    Ok(Json(StatusResponse {
        status: "running",
        active_clients: state.registry.count(),
        max_connections: state.registry.max_connections(),
        uptime_seconds,
        uptime: format_uptime(uptime_seconds),
        version: crate::VERSION,
        started_at: state.started_at,
        ping_timeout: state.config.server.ping_timeout,
        ssl_enabled: state.config.server.ssl_enabled,
        history: state.history.query(params.hours),
    }))
}
