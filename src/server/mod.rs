//! Control-plane server runtime
//!
//! Owns the registry, broadcaster and history recorder for the lifetime of
//! the process, injects them into the router through `AppState`, and runs the
//! heartbeat monitor and history recorder next to the HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::{create_router, AppState};
use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::heartbeat::HeartbeatMonitor;
use crate::history::HistoryRecorder;
use crate::registry::{CloseReason, Registry};
use crate::types::{ControlError, ControlResult};

/// The assembled server
pub struct ControlServer {
    config: Arc<Config>,
    registry: Arc<Registry>,
    history: Arc<HistoryRecorder>,
    state: Arc<AppState>,
}

impl ControlServer {
    /// Build every component from `config`
    pub fn new(config: Config) -> ControlResult<Self> {
        config.validate()?;

        let registry = Arc::new(Registry::new(
            config.server.max_connections,
            Broadcaster::new(),
        ));
        let history = Arc::new(match &config.history.file {
            Some(path) => HistoryRecorder::with_file(config.history.retention_hours, path)?,
            None => HistoryRecorder::new(config.history.retention_hours),
        });
        let config = Arc::new(config);
        let state = Arc::new(AppState::new(
            registry.clone(),
            history.clone(),
            config.clone(),
        ));

        Ok(Self {
            config,
            registry,
            history,
            state,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn heartbeat_monitor(&self) -> HeartbeatMonitor {
        HeartbeatMonitor::new(
            self.registry.clone(),
            self.config.ping_timeout(),
            self.config.idle_after(),
            self.config.sweep_interval(),
        )
    }

    /// Bind the configured address and serve until `shutdown` flips to `true`
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> ControlResult<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ControlError::Config(format!("cannot bind {}: {}", addr, e)))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener, shutdown: watch::Receiver<bool>) -> ControlResult<()> {
        let local_addr: SocketAddr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            max_connections = self.config.server.max_connections,
            ping_timeout_secs = self.config.server.ping_timeout,
            "control server listening"
        );
        if self.config.server.ssl_enabled {
            warn!("sslEnabled is set; TLS must be terminated in front of this listener");
        }

        let monitor = tokio::spawn(self.heartbeat_monitor().run(shutdown.clone()));
        let recorder = tokio::spawn(self.history.clone().run(
            self.registry.clone(),
            self.config.sample_interval(),
            shutdown.clone(),
        ));

        let registry = self.registry.clone();
        let mut signal = shutdown;
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                wait_for_shutdown(&mut signal).await;
                info!("shutdown requested");
                // Upgraded WebSockets are not tracked by the HTTP server; closing
                // every session tells their tasks to finish.
                registry.close_all(CloseReason::Shutdown);
            })
            .await?;

        let _ = monitor.await;
        let _ = recorder.await;
        info!("control server stopped");
        Ok(())
    }
}

/// Resolve once the watch value is `true` or the sender is gone
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Shutdown channel whose sender flips to `true` on Ctrl+C / SIGTERM
pub fn shutdown_signal() -> ControlResult<(watch::Sender<bool>, watch::Receiver<bool>)> {
    let (tx, rx) = watch::channel(false);
    let handler_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = handler_tx.send(true);
    })
    .map_err(|e| ControlError::Config(format!("cannot install signal handler: {}", e)))?;
    Ok((tx, rx))
}
