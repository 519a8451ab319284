//! Connection history endpoint

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};

use super::{ApiError, HoursParams};
use crate::api::state::AppState;
use crate::types::HistorySample;

/// GET /api/connections/history?hours=1 - Samples oldest first, empty if none
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HoursParams>, QueryRejection>,
) -> Result<Json<Vec<HistorySample>>, ApiError> {
    let Query(params) = query?;
    Ok(Json(state.history.query(params.hours)))
}
