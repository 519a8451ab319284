//! Connection-count history sample

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of live sessions at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySample {
    pub time: DateTime<Utc>,
    pub connection_count: usize,
}

impl HistorySample {
    pub fn new(time: DateTime<Utc>, connection_count: usize) -> Self {
        Self {
            time,
            connection_count,
        }
    }
}
