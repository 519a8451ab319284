//! Connection registry: the single source of truth for who is connected
//!
//! All mutations go through one `parking_lot::Mutex` around the session map
//! and every read hands back clones, so callers never observe a structure
//! that is being mutated. Events are published while the lock is held to keep
//! them in mutation order; publishing is a non-blocking enqueue.
//!
//! Transports never own a `Session`. They hold the client id plus the
//! generation number handed out by [`Registry::attach`], and wait on the
//! close signal the registry fires when the session is removed or replaced.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::broadcast::Broadcaster;
use crate::types::{ConnectionEvent, ControlError, ControlResult, Session, SessionStatus};

/// Maximum client id length
const MAX_CLIENT_ID_LEN: usize = 128;

/// Why the registry told a transport to close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection registered the same id
    Replaced,
    /// Removed through the operator API
    Disconnected,
    /// Heartbeat timeout
    Expired,
    /// Server shutting down
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Replaced => "replaced by newer connection",
            CloseReason::Disconnected => "disconnected by operator",
            CloseReason::Expired => "heartbeat timeout",
            CloseReason::Shutdown => "server shutting down",
        }
    }
}

/// Handle returned to a transport on successful registration
#[derive(Debug)]
pub struct Registration {
    /// Snapshot of the session as registered
    pub session: Session,
    /// Identifies this transport's claim on the id
    pub generation: u64,
    /// Fires when the registry wants this transport closed
    pub closed: oneshot::Receiver<CloseReason>,
}

struct Entry {
    session: Session,
    generation: u64,
    close_tx: Option<oneshot::Sender<CloseReason>>,
}

impl Entry {
    fn close(&mut self, reason: CloseReason) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(reason);
        }
    }
}

struct Sessions {
    entries: HashMap<String, Entry>,
    next_generation: u64,
}

/// Concurrent map of live sessions
pub struct Registry {
    sessions: Mutex<Sessions>,
    max_connections: usize,
    broadcaster: Broadcaster,
}

/// Reject ids that are empty, oversized or could be mistaken for paths
pub fn validate_client_id(id: &str) -> ControlResult<()> {
    if id.trim().is_empty() {
        return Err(ControlError::InvalidClientId("client id cannot be empty".into()));
    }
    if id.len() > MAX_CLIENT_ID_LEN {
        return Err(ControlError::InvalidClientId(format!(
            "client id longer than {} bytes",
            MAX_CLIENT_ID_LEN
        )));
    }
    if id.contains('/') || id.contains('\\') || id.chars().any(|c| c.is_control()) {
        return Err(ControlError::InvalidClientId(format!(
            "client id {:?} contains invalid characters",
            id
        )));
    }
    Ok(())
}

impl Registry {
    /// Create a registry that admits at most `max_connections` sessions
    pub fn new(max_connections: usize, broadcaster: Broadcaster) -> Self {
        Self {
            sessions: Mutex::new(Sessions {
                entries: HashMap::new(),
                next_generation: 1,
            }),
            max_connections,
            broadcaster,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Register (or re-register) `id` without binding a transport
    pub fn register(&self, id: &str) -> ControlResult<Session> {
        self.register_at(id, Utc::now())
    }

    pub fn register_at(&self, id: &str, now: DateTime<Utc>) -> ControlResult<Session> {
        self.attach_at(id, now).map(|registration| registration.session)
    }

    /// Register `id` for a transport and hand back its close signal
    ///
    /// Re-registering a live id is an upsert: the entry keeps its
    /// `connected_since`, goes back to `Connecting` and the previous transport
    /// is told to close. Only new ids count against capacity.
    pub fn attach(&self, id: &str) -> ControlResult<Registration> {
        self.attach_at(id, Utc::now())
    }

    pub fn attach_at(&self, id: &str, now: DateTime<Utc>) -> ControlResult<Registration> {
        validate_client_id(id)?;

        let (close_tx, closed) = oneshot::channel();
        let mut sessions = self.sessions.lock();
        let generation = sessions.next_generation;

        let replaced = match sessions.entries.get_mut(id) {
            Some(entry) => {
                entry.close(CloseReason::Replaced);
                entry.session.status = SessionStatus::Connecting;
                entry.session.last_ping = now;
                entry.generation = generation;
                entry.close_tx = Some(close_tx);
                true
            }
            None => {
                if sessions.entries.len() >= self.max_connections {
                    info!(client_id = %id, max = self.max_connections, "rejecting registration, registry full");
                    return Err(ControlError::CapacityExceeded {
                        max: self.max_connections,
                    });
                }
                sessions.entries.insert(
                    id.to_string(),
                    Entry {
                        session: Session::new(id, now),
                        generation,
                        close_tx: Some(close_tx),
                    },
                );
                false
            }
        };
        sessions.next_generation += 1;

        let session = sessions.entries[id].session.clone();
        if replaced {
            info!(client_id = %id, generation, "client reconnected, replaced previous connection");
        } else {
            info!(client_id = %id, generation, active = sessions.entries.len(), "client registered");
        }
        self.publish_status(&sessions, session.clone());
        self.publish_list(&sessions);

        Ok(Registration {
            session,
            generation,
            closed,
        })
    }

    /// Record a heartbeat; unknown ids are a silent no-op returning `false`
    pub fn touch(&self, id: &str) -> bool {
        self.touch_at(id, Utc::now())
    }

    pub fn touch_at(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.entries.get_mut(id) else {
            debug!(client_id = %id, "heartbeat for unknown session ignored");
            return false;
        };

        if now > entry.session.last_ping {
            entry.session.last_ping = now;
        }
        if entry.session.status != SessionStatus::Connected {
            let from = entry.session.status;
            entry.session.status = SessionStatus::Connected;
            let session = entry.session.clone();
            debug!(client_id = %id, %from, "session connected");
            self.publish_status(&sessions, session);
        }
        true
    }

    /// Remove `id` and close its transport
    pub fn remove(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.entries.remove(id) {
            Some(mut entry) => {
                entry.close(CloseReason::Disconnected);
                info!(client_id = %id, "client disconnected");
                self.publish_removal(&sessions, entry.session);
                true
            }
            None => false,
        }
    }

    /// Remove `id` on behalf of the transport that registered it
    ///
    /// Does nothing when the entry has since been claimed by a newer
    /// transport, so a superseded connection cannot tear down its successor.
    pub fn release(&self, id: &str, generation: u64) -> bool {
        let mut sessions = self.sessions.lock();
        let owns = sessions
            .entries
            .get(id)
            .is_some_and(|entry| entry.generation == generation);
        if !owns {
            return false;
        }
        match sessions.entries.remove(id) {
            Some(entry) => {
                info!(client_id = %id, generation, "client transport closed");
                self.publish_removal(&sessions, entry.session);
                true
            }
            None => false,
        }
    }

    /// Move a `Connected` session to `Idle` if it is still silent for longer than `idle_after`
    pub fn mark_idle_if_stale(&self, id: &str, idle_after: Duration, now: DateTime<Utc>) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.entries.get_mut(id) else {
            return false;
        };
        if entry.session.status != SessionStatus::Connected
            || !entry.session.is_silent_for(idle_after, now)
        {
            return false;
        }
        entry.session.status = SessionStatus::Idle;
        let session = entry.session.clone();
        debug!(client_id = %id, "session idle");
        self.publish_status(&sessions, session);
        true
    }

    /// Remove `id` if it is still silent for longer than `ping_timeout`
    ///
    /// The staleness check is repeated under the lock, so a heartbeat that
    /// lands between a sweep's snapshot and this call keeps the session alive.
    pub fn expire_if_stale(
        &self,
        id: &str,
        ping_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Option<Session> {
        let mut sessions = self.sessions.lock();
        let stale = sessions
            .entries
            .get(id)
            .is_some_and(|entry| entry.session.is_silent_for(ping_timeout, now));
        if !stale {
            return None;
        }
        let mut entry = sessions.entries.remove(id)?;
        entry.close(CloseReason::Expired);
        info!(
            client_id = %id,
            silent_secs = entry.session.silence(now).num_seconds(),
            "session expired"
        );
        let session = entry.session.clone();
        self.publish_removal(&sessions, entry.session);
        Some(session)
    }

    /// Remove every session, e.g. on shutdown
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let mut sessions = self.sessions.lock();
        let drained: Vec<Entry> = sessions.entries.drain().map(|(_, entry)| entry).collect();
        let count = drained.len();
        for mut entry in drained {
            entry.close(reason);
        }
        if count > 0 {
            info!(count, reason = reason.as_str(), "closed all sessions");
            self.publish_list(&sessions);
        }
        count
    }

    /// Snapshot of all sessions, oldest connection first
    pub fn list(&self) -> Vec<Session> {
        snapshot(&self.sessions.lock())
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions
            .lock()
            .entries
            .get(id)
            .map(|entry| entry.session.clone())
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().entries.len()
    }

    fn publish_status(&self, sessions: &Sessions, session: Session) {
        self.broadcaster.publish(ConnectionEvent::StatusUpdate {
            session,
            active_clients: sessions.entries.len(),
        });
    }

    fn publish_list(&self, sessions: &Sessions) {
        self.broadcaster.publish(ConnectionEvent::ClientListUpdate {
            clients: snapshot(sessions),
        });
    }

    fn publish_removal(&self, sessions: &Sessions, mut session: Session) {
        session.status = SessionStatus::Disconnected;
        self.publish_status(sessions, session);
        self.publish_list(sessions);
    }
}

fn snapshot(sessions: &Sessions) -> Vec<Session> {
    let mut list: Vec<Session> = sessions
        .entries
        .values()
        .map(|entry| entry.session.clone())
        .collect();
    list.sort_by(|a, b| {
        a.connected_since
            .cmp(&b.connected_since)
            .then_with(|| a.id.cmp(&b.id))
    });
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(max: usize) -> Registry {
        Registry::new(max, Broadcaster::new())
    }

    #[test]
    fn test_register_and_count() {
        let reg = registry(10);
        let session = reg.register("mcp-a").unwrap();
        assert_eq!(session.status, SessionStatus::Connecting);
        reg.register("mcp-b").unwrap();
        assert_eq!(reg.count(), 2);
    }

    #[test]
    fn test_reregister_is_upsert() {
        let reg = registry(10);
        let t0 = Utc::now();
        let first = reg.register_at("mcp-a", t0).unwrap();
        reg.touch_at("mcp-a", t0 + Duration::seconds(1));

        let again = reg.register_at("mcp-a", t0 + Duration::seconds(5)).unwrap();
        assert_eq!(reg.count(), 1);
        assert_eq!(again.connected_since, first.connected_since);
        assert_eq!(again.status, SessionStatus::Connecting);
        assert_eq!(again.last_ping, t0 + Duration::seconds(5));
    }

    #[test]
    fn test_touch_unknown_is_noop() {
        let reg = registry(10);
        assert!(!reg.touch("ghost"));
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn test_touch_marks_connected() {
        let reg = registry(10);
        reg.register("mcp-a").unwrap();
        assert!(reg.touch("mcp-a"));
        assert_eq!(reg.get("mcp-a").unwrap().status, SessionStatus::Connected);
    }

    #[test]
    fn test_remove() {
        let reg = registry(10);
        reg.register("mcp-a").unwrap();
        assert!(reg.remove("mcp-a"));
        assert!(!reg.remove("mcp-a"));
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn test_capacity_counts_only_new_ids() {
        let reg = registry(1);
        reg.register("mcp-a").unwrap();
        assert!(matches!(
            reg.register("mcp-b"),
            Err(ControlError::CapacityExceeded { max: 1 })
        ));
        assert!(reg.register("mcp-a").is_ok());
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let reg = registry(10);
        assert!(matches!(reg.register(""), Err(ControlError::InvalidClientId(_))));
        assert!(matches!(reg.register("a/b"), Err(ControlError::InvalidClientId(_))));
        assert!(matches!(reg.register("a\nb"), Err(ControlError::InvalidClientId(_))));
        let long = "x".repeat(MAX_CLIENT_ID_LEN + 1);
        assert!(matches!(reg.register(&long), Err(ControlError::InvalidClientId(_))));
    }

    #[test]
    fn test_list_is_ordered_snapshot() {
        let reg = registry(10);
        let t0 = Utc::now();
        reg.register_at("mcp-b", t0 + Duration::seconds(1)).unwrap();
        reg.register_at("mcp-a", t0 + Duration::seconds(2)).unwrap();
        reg.register_at("mcp-c", t0).unwrap();

        let list = reg.list();
        let ids: Vec<&str> = list.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["mcp-c", "mcp-b", "mcp-a"]);

        reg.remove("mcp-c");
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_replace_closes_previous_transport() {
        let reg = registry(10);
        let mut first = reg.attach("mcp-a").unwrap();
        let second = reg.attach("mcp-a").unwrap();

        assert_eq!(first.closed.try_recv().unwrap(), CloseReason::Replaced);
        assert!(second.generation > first.generation);
    }

    #[test]
    fn test_release_ignores_stale_generation() {
        let reg = registry(10);
        let first = reg.attach("mcp-a").unwrap();
        let second = reg.attach("mcp-a").unwrap();

        assert!(!reg.release("mcp-a", first.generation));
        assert_eq!(reg.count(), 1);
        assert!(reg.release("mcp-a", second.generation));
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn test_remove_signals_transport() {
        let reg = registry(10);
        let mut registration = reg.attach("mcp-a").unwrap();
        reg.remove("mcp-a");
        assert_eq!(registration.closed.try_recv().unwrap(), CloseReason::Disconnected);
    }

    #[test]
    fn test_idle_and_expire_respect_thresholds() {
        let reg = registry(10);
        let t0 = Utc::now();
        reg.register_at("mcp-a", t0).unwrap();
        reg.touch_at("mcp-a", t0);

        assert!(!reg.mark_idle_if_stale("mcp-a", Duration::seconds(15), t0 + Duration::seconds(15)));
        assert!(reg.mark_idle_if_stale("mcp-a", Duration::seconds(15), t0 + Duration::seconds(16)));
        assert_eq!(reg.get("mcp-a").unwrap().status, SessionStatus::Idle);

        assert!(reg.expire_if_stale("mcp-a", Duration::seconds(30), t0 + Duration::seconds(30)).is_none());
        let expired = reg.expire_if_stale("mcp-a", Duration::seconds(30), t0 + Duration::seconds(31));
        assert_eq!(expired.unwrap().id, "mcp-a");
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn test_heartbeat_revives_idle_session() {
        let reg = registry(10);
        let t0 = Utc::now();
        reg.register_at("mcp-a", t0).unwrap();
        reg.touch_at("mcp-a", t0);
        reg.mark_idle_if_stale("mcp-a", Duration::seconds(15), t0 + Duration::seconds(20));

        reg.touch_at("mcp-a", t0 + Duration::seconds(21));
        assert_eq!(reg.get("mcp-a").unwrap().status, SessionStatus::Connected);
    }

    #[test]
    fn test_events_published_for_mutations() {
        let hub = Broadcaster::new();
        let reg = Registry::new(10, hub.clone());
        let mut sub = hub.subscribe();

        reg.register("mcp-a").unwrap();
        let status = sub.try_recv().unwrap();
        assert!(matches!(
            &status.event,
            ConnectionEvent::StatusUpdate { session, active_clients: 1 }
                if session.status == SessionStatus::Connecting
        ));
        let list = sub.try_recv().unwrap();
        assert!(matches!(&list.event, ConnectionEvent::ClientListUpdate { clients } if clients.len() == 1));

        reg.remove("mcp-a");
        let status = sub.try_recv().unwrap();
        assert!(matches!(
            &status.event,
            ConnectionEvent::StatusUpdate { session, active_clients: 0 }
                if session.status == SessionStatus::Disconnected
        ));
        let list = sub.try_recv().unwrap();
        assert!(matches!(&list.event, ConnectionEvent::ClientListUpdate { clients } if clients.is_empty()));
    }

    #[test]
    fn test_close_all() {
        let reg = registry(10);
        let mut a = reg.attach("mcp-a").unwrap();
        reg.attach("mcp-b").unwrap();

        assert_eq!(reg.close_all(CloseReason::Shutdown), 2);
        assert_eq!(reg.count(), 0);
        assert_eq!(a.closed.try_recv().unwrap(), CloseReason::Shutdown);
    }
}
