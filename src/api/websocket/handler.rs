//! WebSocket connection handler

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{PING, PONG};
use crate::api::state::AppState;
use crate::registry::{CloseReason, Registration};
use crate::types::ControlError;

/// JSON form of the heartbeat, `{"type":"ping"}`
#[derive(Debug, Deserialize)]
struct TypedMessage {
    #[serde(rename = "type")]
    kind: String,
}

/// Whether a text frame is a heartbeat
pub fn is_ping(text: &str) -> bool {
    let text = text.trim();
    if text == PING {
        return true;
    }
    serde_json::from_str::<TypedMessage>(text)
        .map(|msg| msg.kind == PING)
        .unwrap_or(false)
}

/// WebSocket upgrade handler for `/ws/:client_id`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

/// Drive one client connection from registration to close
async fn handle_socket(mut socket: WebSocket, client_id: String, state: Arc<AppState>) {
    // Subscribe first so this client also sees its own registration events
    let mut events = state.subscribe();

    let Registration {
        generation,
        mut closed,
        ..
    } = match state.registry.attach(&client_id) {
        Ok(registration) => registration,
        Err(err) => {
            reject(socket, &client_id, err).await;
            return;
        }
    };

    let close_reason = loop {
        tokio::select! {
            reason = &mut closed => {
                break reason.ok();
            }

            // Push connection events to the client
            msg = events.recv() => {
                match msg {
                    Some(msg) => {
                        let Ok(json) = serde_json::to_string(msg.as_ref()) else {
                            continue;
                        };
                        if socket.send(Message::Text(json)).await.is_err() {
                            break None;
                        }
                    }
                    None => {
                        warn!(client_id = %client_id, "event queue overflowed, dropping connection");
                        break None;
                    }
                }
            }

            // Handle client messages
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(msg)) => {
                        if !handle_client_message(msg, &client_id, &state, &mut socket).await {
                            break None;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(client_id = %client_id, error = %e, "websocket error");
                        break None;
                    }
                    None => break None,
                }
            }
        }
    };

    match close_reason {
        // The registry already dropped (or handed over) the session
        Some(reason) => {
            info!(client_id = %client_id, reason = reason.as_str(), "closing client connection");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: Cow::Borrowed(reason.as_str()),
                })))
                .await;
        }
        None => {
            state.registry.release(&client_id, generation);
        }
    }
}

/// Refuse a connection the registry would not accept
async fn reject(mut socket: WebSocket, client_id: &str, err: ControlError) {
    let code = match err {
        ControlError::CapacityExceeded { .. } => close_code::AGAIN,
        ControlError::InvalidClientId(_) => close_code::POLICY,
        _ => close_code::ERROR,
    };
    warn!(client_id = %client_id, error = %err, "rejecting client connection");
    let reason = match err {
        ControlError::CapacityExceeded { .. } => Cow::Borrowed("capacity exceeded"),
        other => Cow::Owned(other.to_string()),
    };
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code, reason })))
        .await;
}

/// Handle a message from the client
/// Returns false if the connection should be closed
async fn handle_client_message(
    msg: Message,
    client_id: &str,
    state: &AppState,
    socket: &mut WebSocket,
) -> bool {
    match msg {
        Message::Text(text) => {
            if is_ping(&text) {
                state.registry.touch(client_id);
                if socket.send(Message::Text(PONG.to_string())).await.is_err() {
                    return false;
                }
            } else {
                debug!(client_id = %client_id, "ignoring non-heartbeat message");
            }
            true
        }
        Message::Binary(_) => true,
        // Protocol-level pings count as liveness too; tungstenite answers them
        Message::Ping(_) => {
            state.registry.touch(client_id);
            true
        }
        Message::Pong(_) => true,
        Message::Close(_) => false,
    }
}
