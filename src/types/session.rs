//! Session type: one logical client connection as tracked by the registry

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Liveness status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Handshake done, no heartbeat received yet
    Connecting,
    /// Heartbeats arriving within the idle window
    Connected,
    /// Silent for longer than the idle window but not yet expired
    Idle,
    /// Terminal; only ever seen in the final event for a removed session
    Disconnected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Idle => "idle",
            SessionStatus::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side record of one logical client connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Client-generated id, stable across reconnects
    pub id: String,
    pub status: SessionStatus,
    /// First successful registration of this id
    pub connected_since: DateTime<Utc>,
    /// Most recent heartbeat (or the registration time)
    pub last_ping: DateTime<Utc>,
}

impl Session {
    /// Create a freshly registered session
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::Connecting,
            connected_since: now,
            last_ping: now,
        }
    }

    /// Time since the last heartbeat
    pub fn silence(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_ping
    }

    /// Whether the session has been silent for strictly longer than `limit`
    pub fn is_silent_for(&self, limit: Duration, now: DateTime<Utc>) -> bool {
        self.silence(now) > limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_serialization() {
        let now = Utc::now();
        let session = Session::new("mcp-abc", now);
        let json = serde_json::to_value(&session).unwrap();

        assert_eq!(json["id"], "mcp-abc");
        assert_eq!(json["status"], "connecting");
        assert!(json.get("connectedSince").is_some());
        assert!(json.get("lastPing").is_some());
    }

    #[test]
    fn test_is_silent_for_is_strict() {
        let t0 = Utc::now();
        let session = Session::new("mcp-abc", t0);
        let limit = Duration::seconds(30);

        assert!(!session.is_silent_for(limit, t0 + Duration::seconds(30)));
        assert!(session.is_silent_for(limit, t0 + Duration::seconds(31)));
    }
}
