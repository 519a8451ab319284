//! Server configuration
//!
//! Loaded from a JSON file (`config.json` by default, `MCP_CONFIG_PATH` to
//! override) with environment overrides for the most common settings. Every
//! field has a default, so a missing file or a partial file is fine.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{ControlError, ControlResult};
use crate::utils::atomic_write;

/// Default config file name, resolved against the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Listener and capacity settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub max_connections: usize,
    /// Seconds without a heartbeat before a session expires
    pub ping_timeout: u64,
    pub ssl_enabled: bool,
    pub ssl_cert_path: Option<PathBuf>,
    pub ssl_key_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            debug: false,
            max_connections: 100,
            ping_timeout: 30,
            ssl_enabled: false,
            ssl_cert_path: None,
            ssl_key_path: None,
        }
    }
}

/// Heartbeat monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatConfig {
    pub sweep_interval_secs: u64,
    /// Silence before a `Connected` session is marked idle. Unset means
    /// `pingTimeout`, so a session is only reported idle by an explicit setting.
    pub idle_after_secs: Option<u64>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 10,
            idle_after_secs: None,
        }
    }
}

/// Connection history settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    pub sample_interval_secs: u64,
    pub retention_hours: f64,
    /// JSONL file to persist samples to; in-memory only when unset
    pub file: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 60,
            retention_hours: 24.0,
            file: None,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server: ServerConfig,
    pub heartbeat: HeartbeatConfig,
    pub history: HistoryConfig,
}

impl Config {
    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> ControlResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| ControlError::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load from `MCP_CONFIG_PATH` (or `config.json`), then apply env overrides
    pub fn from_env() -> ControlResult<Self> {
        let path = env::var("MCP_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut config = Self::load(&path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MCP_HOST`, `MCP_PORT`, `MCP_MAX_CONNECTIONS`, `MCP_PING_TIMEOUT`
    pub fn apply_env_overrides(&mut self) -> ControlResult<()> {
        if let Ok(host) = env::var("MCP_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("MCP_PORT") {
            self.server.port = parse_env("MCP_PORT", &port)?;
        }
        if let Ok(max) = env::var("MCP_MAX_CONNECTIONS") {
            self.server.max_connections = parse_env("MCP_MAX_CONNECTIONS", &max)?;
        }
        if let Ok(timeout) = env::var("MCP_PING_TIMEOUT") {
            self.server.ping_timeout = parse_env("MCP_PING_TIMEOUT", &timeout)?;
        }
        Ok(())
    }

    /// Write the configuration back to disk
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ControlResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        atomic_write(path, &json)?;
        Ok(())
    }

    /// Reject settings the registry and monitor cannot run with
    pub fn validate(&self) -> ControlResult<()> {
        if self.server.max_connections == 0 {
            return Err(ControlError::Config("maxConnections must be at least 1".into()));
        }
        if self.server.ping_timeout == 0 {
            return Err(ControlError::Config("pingTimeout must be at least 1 second".into()));
        }
        if self.heartbeat.sweep_interval_secs == 0 {
            return Err(ControlError::Config("sweepIntervalSecs must be at least 1".into()));
        }
        if let Some(idle) = self.heartbeat.idle_after_secs {
            if idle >= self.server.ping_timeout {
                return Err(ControlError::Config(format!(
                    "idleAfterSecs ({}) must be below pingTimeout ({})",
                    idle, self.server.ping_timeout
                )));
            }
        }
        if self.history.sample_interval_secs == 0 {
            return Err(ControlError::Config("sampleIntervalSecs must be at least 1".into()));
        }
        if !(self.history.retention_hours.is_finite() && self.history.retention_hours > 0.0) {
            return Err(ControlError::Config("retentionHours must be positive".into()));
        }
        if self.server.ssl_enabled
            && (self.server.ssl_cert_path.is_none() || self.server.ssl_key_path.is_none())
        {
            return Err(ControlError::Config(
                "sslEnabled requires sslCertPath and sslKeyPath".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.server.ping_timeout)
    }

    pub fn idle_after(&self) -> Duration {
        match self.heartbeat.idle_after_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.ping_timeout(),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.sweep_interval_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.history.sample_interval_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> ControlResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ControlError::Config(format!("{} has an invalid value: {:?}", name, value)))
}
