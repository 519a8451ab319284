//! Shared application state injected into every handler

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::broadcast::{Broadcaster, Subscription};
use crate::config::Config;
use crate::history::HistoryRecorder;
use crate::registry::Registry;
use crate::utils::seconds_since;

/// Everything the HTTP and WebSocket handlers need
pub struct AppState {
    /// Live sessions
    pub registry: Arc<Registry>,

    /// Connection count time series
    pub history: Arc<HistoryRecorder>,

    pub config: Arc<Config>,

    /// When the server started, for uptime reporting
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, history: Arc<HistoryRecorder>, config: Arc<Config>) -> Self {
        Self {
            registry,
            history,
            config,
            started_at: Utc::now(),
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        self.registry.broadcaster()
    }

    /// Subscribe to connection events
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster().subscribe()
    }

    pub fn current_sequence_id(&self) -> u64 {
        self.broadcaster().current_sequence_id()
    }

    pub fn uptime_secs(&self) -> u64 {
        seconds_since(self.started_at, Utc::now())
    }
}
