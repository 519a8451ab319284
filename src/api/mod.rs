//! API module for HTTP and WebSocket endpoints
//!
//! - `GET /ws/:client_id` - client WebSocket (heartbeat + event push)
//! - `GET /api/events` - SSE stream of connection events for dashboards
//! - `/api/*` - REST endpoints for the operator console

pub mod http;
pub mod rest;
pub mod sse;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use state::AppState;
