//! Persistent client identity
//!
//! The id is generated once per installation and reused on every start, so
//! the server registry can tell a reconnect from a new client.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::registry::validate_client_id;
use crate::types::ControlResult;
use crate::utils::atomic_write;

/// Default identity file, relative to the working directory
pub const DEFAULT_IDENTITY_FILE: &str = ".mcp-client-id";

/// Generate a fresh `mcp-<uuid>` id
pub fn generate_client_id() -> String {
    format!("mcp-{}", uuid::Uuid::new_v4().simple())
}

/// Identity file from `MCP_CLIENT_ID_FILE`, or the default
pub fn default_identity_path() -> PathBuf {
    std::env::var("MCP_CLIENT_ID_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_IDENTITY_FILE))
}

/// Read the persisted id, creating and saving one if missing or unusable
pub fn load_or_create<P: AsRef<Path>>(path: P) -> ControlResult<String> {
    let path = path.as_ref();
    if path.exists() {
        let stored = std::fs::read_to_string(path)?;
        let stored = stored.trim();
        match validate_client_id(stored) {
            Ok(()) => return Ok(stored.to_string()),
            Err(e) => warn!(path = %path.display(), error = %e, "discarding unusable client id"),
        }
    }

    let id = generate_client_id();
    atomic_write(path, &id)?;
    info!(path = %path.display(), client_id = %id, "generated new client id");
    Ok(id)
}
