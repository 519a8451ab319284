//! MCP Control Server
//!
//! Tracks live client connections and pushes connection events to every
//! subscriber in real time.
//!
//! # Features
//!
//! - **Session Registry**: Bounded, thread-safe set of connected clients keyed by id
//! - **Heartbeats**: Idle and expiry detection by a single periodic sweep
//! - **Event Fan-out**: Ordered status and client-list events over WebSocket and SSE
//! - **History**: Rolling connection-count time series, optionally persisted
//! - **Client**: Reconnecting connection manager with lazy connect and teardown
//!
//! # Modules
//!
//! - `types`: Sessions, events, history samples and errors
//! - `registry`: Session registry and close signalling
//! - `broadcast`: Non-blocking publish/subscribe hub
//! - `heartbeat`: Idle and timeout sweep
//! - `history`: Connection history recorder
//! - `api`: HTTP, WebSocket and SSE surface
//! - `server`: Server runtime and shutdown
//! - `client`: Client connection manager and identity
//! - `config`: JSON configuration with environment overrides
//! - `utils`: Time and file helpers
//!
//! # Example
//!
//! ```no_run
//! use mcp_control::config::Config;
//! use mcp_control::server::{shutdown_signal, ControlServer};
//!
//! #[tokio::main]
//! async fn main() -> mcp_control::types::ControlResult<()> {
//!     let (_tx, rx) = shutdown_signal()?;
//!     ControlServer::new(Config::default())?.run(rx).await
//! }
//! ```

pub mod api;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod heartbeat;
pub mod history;
pub mod registry;
pub mod server;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use broadcast::{Broadcaster, Subscription};
pub use client::{ClientConfig, ClientEvent, ConnectionManager, ConnectionState};
pub use config::Config;
pub use heartbeat::HeartbeatMonitor;
pub use history::HistoryRecorder;
pub use registry::{CloseReason, Registry};
pub use server::ControlServer;
pub use types::{
    ConnectionEvent, ControlError, ControlResult, EventMessage, HistorySample, Session,
    SessionStatus,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
