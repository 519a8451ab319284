//! MCP Control Client - reference client
//!
//! Loads (or creates) the persistent client id, connects to the control
//! server and logs every state change and event until Ctrl+C.

use mcp_control::client::{load_or_create, ClientConfig, ClientEvent, ConnectionManager};
use mcp_control::server::{shutdown_signal, wait_for_shutdown};
use mcp_control::types::{ConnectionEvent, ControlResult};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ControlResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ClientConfig::from_env();
    let client_id = load_or_create(&config.identity_file)?;
    info!(client_id = %client_id, server = %config.server_url, "starting client");

    let manager = ConnectionManager::websocket(client_id, config);
    let _listener = manager.add_listener(|event| match event {
        ClientEvent::State(state) => info!(state = state.as_str(), "connection state"),
        ClientEvent::Message(msg) => match &msg.event {
            ConnectionEvent::StatusUpdate {
                session,
                active_clients,
            } => info!(
                seq = msg.sequence_id,
                client_id = %session.id,
                status = %session.status,
                active_clients,
                "status update"
            ),
            ConnectionEvent::ClientListUpdate { clients } => {
                info!(seq = msg.sequence_id, clients = clients.len(), "client list update")
            }
        },
    });

    let (_shutdown_tx, mut shutdown_rx) = shutdown_signal()?;
    wait_for_shutdown(&mut shutdown_rx).await;
    manager.disconnect();
    info!("client stopped");
    Ok(())
}
