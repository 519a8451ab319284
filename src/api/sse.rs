//! SSE stream of connection events for dashboard viewers
//!
//! Dashboards that only watch (and hold no client id) subscribe here instead
//! of opening a client WebSocket. The stream starts with a client list
//! snapshot, then forwards every event.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
};
use tracing::debug;

use super::state::AppState;
use crate::types::{ConnectionEvent, EventMessage};

/// GET /api/events
pub async fn events_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Subscribe before taking the snapshot so nothing falls in between
    let mut subscription = state.subscribe();
    let snapshot = EventMessage {
        event: ConnectionEvent::ClientListUpdate {
            clients: state.registry.list(),
        },
        sequence_id: state.current_sequence_id(),
        timestamp: chrono::Utc::now().timestamp(),
    };
    debug!(subscriber = subscription.id(), "dashboard subscribed to events");

    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(to_sse(&snapshot));

        while let Some(msg) = subscription.recv().await {
            yield Ok(to_sse(&msg).id(msg.sequence_id.to_string()));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default().interval(Duration::from_secs(15)))
}

// The snapshot goes out without an `id:` so only published events move Last-Event-ID
fn to_sse(msg: &EventMessage) -> Event {
    Event::default()
        .event(msg.event.kind())
        .data(serde_json::to_string(msg).unwrap_or_default())
}
