//! Integration tests for the registry, heartbeat sweep and history

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use mcp_control::broadcast::Broadcaster;
use mcp_control::heartbeat::HeartbeatMonitor;
use mcp_control::history::HistoryRecorder;
use mcp_control::registry::{CloseReason, Registry};
use mcp_control::types::{ConnectionEvent, ControlError, SessionStatus};

fn setup_registry(max: usize) -> (Arc<Registry>, Broadcaster) {
    let hub = Broadcaster::new();
    (Arc::new(Registry::new(max, hub.clone())), hub)
}

fn monitor(registry: &Arc<Registry>) -> HeartbeatMonitor {
    HeartbeatMonitor::new(
        registry.clone(),
        Duration::from_secs(30),
        Duration::from_secs(15),
        Duration::from_secs(10),
    )
}

#[test]
fn test_heartbeats_keep_session_alive_until_silence() {
    let (registry, hub) = setup_registry(10);
    let mut events = hub.subscribe();
    let monitor = monitor(&registry);
    let t0 = Utc::now();

    registry.register_at("mcp-abc", t0).unwrap();

    // Pings every 5s for 40s, sweeps every 10s
    let mut last_ping = t0;
    for tick in 1..=8 {
        let now = t0 + ChronoDuration::seconds(tick * 5);
        registry.touch_at("mcp-abc", now);
        last_ping = now;
        if tick % 2 == 0 {
            assert!(monitor.sweep_at(now).is_empty());
        }
        let session = registry.get("mcp-abc").unwrap();
        assert_eq!(session.status, SessionStatus::Connected);
    }

    // Silent from here on
    assert!(monitor
        .sweep_at(last_ping + ChronoDuration::seconds(20))
        .expired
        .is_empty());
    assert_eq!(registry.get("mcp-abc").unwrap().status, SessionStatus::Idle);

    let report = monitor.sweep_at(last_ping + ChronoDuration::seconds(31));
    assert_eq!(report.expired, vec!["mcp-abc".to_string()]);
    assert!(registry.get("mcp-abc").is_none());

    // The last list update no longer contains the client
    let mut last_list = None;
    while let Some(msg) = events.try_recv() {
        if let ConnectionEvent::ClientListUpdate { clients } = &msg.event {
            last_list = Some(clients.clone());
        }
    }
    let last_list = last_list.expect("client list update published");
    assert!(last_list.iter().all(|s| s.id != "mcp-abc"));
}

#[test]
fn test_capacity_one() {
    let (registry, _hub) = setup_registry(1);

    registry.register("mcp-a").unwrap();
    assert!(matches!(
        registry.register("mcp-b"),
        Err(ControlError::CapacityExceeded { max: 1 })
    ));

    // Re-registering the existing id is not a new connection
    assert!(registry.register("mcp-a").is_ok());
    assert_eq!(registry.count(), 1);

    assert!(registry.remove("mcp-a"));
    assert!(registry.register("mcp-b").is_ok());
}

#[test]
fn test_count_matches_list() {
    let (registry, _hub) = setup_registry(100);

    for i in 0..20 {
        registry.register(&format!("mcp-{}", i)).unwrap();
        assert_eq!(registry.count(), registry.list().len());
    }
    for i in (0..20).step_by(3) {
        registry.remove(&format!("mcp-{}", i));
        assert_eq!(registry.count(), registry.list().len());
    }
    assert_eq!(registry.count(), 13);
}

#[test]
fn test_concurrent_registration_respects_capacity() {
    let (registry, _hub) = setup_registry(25);
    let mut handles = vec![];

    for t in 0..8 {
        let registry = registry.clone();
        handles.push(thread::spawn(move || {
            let mut admitted = 0;
            for i in 0..10 {
                if registry.register(&format!("mcp-{}-{}", t, i)).is_ok() {
                    admitted += 1;
                }
            }
            admitted
        }));
    }

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 25);
    assert_eq!(registry.count(), 25);
}

#[test]
fn test_concurrent_touch_and_sweep() {
    let (registry, _hub) = setup_registry(100);
    let t0 = Utc::now();
    for i in 0..10 {
        registry.register_at(&format!("mcp-{}", i), t0).unwrap();
    }

    let toucher = {
        let registry = registry.clone();
        thread::spawn(move || {
            for step in 1..=100 {
                for i in 0..10 {
                    registry.touch_at(&format!("mcp-{}", i), t0 + ChronoDuration::milliseconds(step * 100));
                }
            }
        })
    };
    let sweeper = {
        let monitor = monitor(&registry);
        thread::spawn(move || {
            for _ in 0..100 {
                monitor.sweep_at(t0 + ChronoDuration::seconds(5));
            }
        })
    };

    toucher.join().unwrap();
    sweeper.join().unwrap();
    assert_eq!(registry.count(), 10);
}

#[tokio::test]
async fn test_removal_signals_transport() {
    let (registry, _hub) = setup_registry(10);
    let registration = registry.attach("mcp-a").unwrap();

    assert!(registry.remove("mcp-a"));
    assert_eq!(registration.closed.await.unwrap(), CloseReason::Disconnected);
}

#[tokio::test]
async fn test_reconnect_replaces_previous_transport() {
    let (registry, _hub) = setup_registry(10);
    let first = registry.attach("mcp-a").unwrap();
    let second = registry.attach("mcp-a").unwrap();

    assert_eq!(first.closed.await.unwrap(), CloseReason::Replaced);
    assert_eq!(first.session.connected_since, second.session.connected_since);

    // The superseded transport cannot remove its successor
    assert!(!registry.release("mcp-a", first.generation));
    assert!(registry.get("mcp-a").is_some());
    assert!(registry.release("mcp-a", second.generation));
    assert_eq!(registry.count(), 0);
}

#[test]
fn test_history_tracks_registry_count() {
    let (registry, _hub) = setup_registry(10);
    let history = HistoryRecorder::new(24.0);
    let now = Utc::now();

    history.record_at(registry.count(), now - ChronoDuration::minutes(90));
    registry.register("mcp-a").unwrap();
    registry.register("mcp-b").unwrap();
    history.record_at(registry.count(), now - ChronoDuration::minutes(30));

    let last_hour = history.query_at(1.0, now);
    assert_eq!(last_hour.len(), 1);
    assert_eq!(last_hour[0].connection_count, 2);
    assert!(history.query_at(0.0, now).is_empty());
}
