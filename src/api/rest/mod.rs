//! REST API for the operator console
//!
//! - `GET /api/clients` - All live sessions
//! - `GET /api/clients/:id` - One session
//! - `POST /api/clients/:id/disconnect` / `DELETE /api/clients/:id` - Force disconnect
//! - `GET /api/status?hours=` - Aggregate status with recent history
//! - `GET /api/connections/history?hours=` - Connection count samples

pub mod clients;
pub mod history;
pub mod status;

use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::types::ControlError;

/// `?hours=` window used by the status and history endpoints
#[derive(Debug, Deserialize)]
pub struct HoursParams {
    /// How far back to look, in hours (default: 1)
    #[serde(default = "default_hours")]
    pub hours: f64,
}

fn default_hours() -> f64 {
    1.0
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: "BAD_REQUEST".to_string(),
            status: StatusCode::BAD_REQUEST,
        }
    }
}

/// Malformed query strings get the same JSON error body as everything else
impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        let status = match &err {
            ControlError::UnknownSession(_) => StatusCode::NOT_FOUND,
            ControlError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ControlError::InvalidClientId(_) => StatusCode::BAD_REQUEST,
            ControlError::Transport(_) => StatusCode::BAD_GATEWAY,
            ControlError::Config(_) | ControlError::Io(_) | ControlError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
            status,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}
