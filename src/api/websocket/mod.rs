//! Client WebSocket endpoint
//!
//! One task per connection. The client id in the path is registered with
//! the registry on upgrade; text `"ping"` frames are heartbeats answered
//! with `"pong"`; every connection event is pushed as a JSON text frame.

pub mod handler;

pub use handler::ws_handler;

/// Liveness marker sent by clients
pub const PING: &str = "ping";

/// Liveness acknowledgment sent back
pub const PONG: &str = "pong";
