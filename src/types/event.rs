//! Connection events pushed to every subscriber
//!
//! Events carry snapshots rather than deltas: a consumer that missed an
//! event only needs the next one to be correct again.

use serde::{Deserialize, Serialize};

use super::Session;

/// State change broadcast by the registry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// One session changed status (status `disconnected` once removed)
    #[serde(rename_all = "camelCase")]
    StatusUpdate {
        session: Session,
        active_clients: usize,
    },

    /// Full client list after a membership change
    ClientListUpdate { clients: Vec<Session> },
}

impl ConnectionEvent {
    /// Event type tag as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionEvent::StatusUpdate { .. } => "status_update",
            ConnectionEvent::ClientListUpdate { .. } => "client_list_update",
        }
    }
}

/// Wire envelope: the event plus ordering metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    #[serde(flatten)]
    pub event: ConnectionEvent,

    /// Monotonically increasing sequence ID for gap detection
    pub sequence_id: u64,

    /// Unix timestamp when the event was published
    pub timestamp: i64,
}
