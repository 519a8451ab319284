//! MCP Control Server - Binary Entry Point
//!
//! Loads `config.json` (or `MCP_CONFIG_PATH`), then serves the client
//! WebSocket and operator API until Ctrl+C.

use mcp_control::config::Config;
use mcp_control::server::{shutdown_signal, ControlServer};
use mcp_control::types::ControlResult;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ControlResult<()> {
    let config = Config::from_env()?;

    let default_level = if config.server.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let (_shutdown_tx, shutdown_rx) = shutdown_signal()?;
    let server = ControlServer::new(config)?;
    server.run(shutdown_rx).await
}
