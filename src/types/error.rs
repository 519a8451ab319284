//! Error taxonomy for the control plane

use thiserror::Error;

/// Errors surfaced by the registry, API and connection manager
#[derive(Debug, Error)]
pub enum ControlError {
    /// Connection dropped or could not be established
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation on an id the registry does not know
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// Registration refused because the registry is full
    #[error("capacity exceeded: at most {max} concurrent connections")]
    CapacityExceeded { max: usize },

    #[error("invalid client id: {0}")]
    InvalidClientId(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ControlError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::Transport(_) => "TRANSPORT_ERROR",
            ControlError::UnknownSession(_) => "NOT_FOUND",
            ControlError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            ControlError::InvalidClientId(_) => "BAD_REQUEST",
            ControlError::Config(_) => "CONFIG_ERROR",
            ControlError::Io(_) | ControlError::Json(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type for control-plane operations
pub type ControlResult<T> = Result<T, ControlError>;
