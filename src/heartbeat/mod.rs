//! Heartbeat monitor: periodic sweep that idles and expires silent sessions
//!
//! One task sweeps every session on a fixed interval instead of keeping a
//! timer per connection. Worst-case detection latency is
//! `ping_timeout + sweep_interval`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::registry::Registry;
use crate::types::SessionStatus;

/// What one sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions moved to `Idle`
    pub idled: Vec<String>,
    /// Sessions removed for missing the ping timeout
    pub expired: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.idled.is_empty() && self.expired.is_empty()
    }
}

/// Sweeps the registry for sessions that stopped sending heartbeats
pub struct HeartbeatMonitor {
    registry: Arc<Registry>,
    ping_timeout: chrono::Duration,
    idle_after: chrono::Duration,
    sweep_interval: Duration,
}

impl HeartbeatMonitor {
    /// Create a monitor; `idle_after` is clamped to `ping_timeout`
    pub fn new(
        registry: Arc<Registry>,
        ping_timeout: Duration,
        idle_after: Duration,
        sweep_interval: Duration,
    ) -> Self {
        let ping_timeout = to_chrono(ping_timeout);
        let idle_after = to_chrono(idle_after).min(ping_timeout);
        Self {
            registry,
            ping_timeout,
            idle_after,
            sweep_interval,
        }
    }

    /// Sweep using the current time
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    /// Sweep as if the current time were `now`
    ///
    /// A session is expired only when its silence is strictly longer than
    /// `ping_timeout`. Expiry is final; the client has to register again.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for session in self.registry.list() {
            if session.is_silent_for(self.ping_timeout, now) {
                if self
                    .registry
                    .expire_if_stale(&session.id, self.ping_timeout, now)
                    .is_some()
                {
                    report.expired.push(session.id);
                }
            } else if session.status == SessionStatus::Connected
                && session.is_silent_for(self.idle_after, now)
                && self
                    .registry
                    .mark_idle_if_stale(&session.id, self.idle_after, now)
            {
                report.idled.push(session.id);
            }
        }

        if !report.is_empty() {
            debug!(
                idled = report.idled.len(),
                expired = report.expired.len(),
                remaining = self.registry.count(),
                "heartbeat sweep"
            );
        }
        report
    }

    /// Sweep on every tick until `shutdown` flips to `true`
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            ping_timeout_secs = self.ping_timeout.num_seconds(),
            "heartbeat monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("heartbeat monitor stopped");
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
