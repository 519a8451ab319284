//! Client transport seam
//!
//! The connection manager only sees `Connector` and `Transport`, so the
//! reconnect logic runs the same against a real WebSocket or a test double.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::types::{ControlError, ControlResult};

/// Close code the server uses when the registry is full
pub const CLOSE_CAPACITY_EXCEEDED: u16 = 1013;

/// Close code reported when the peer sent no status
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Frame delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

/// An open, bidirectional connection; dropping it closes it
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> ControlResult<()>;

    /// Next frame, or `None` once the connection is gone
    async fn next_frame(&mut self) -> Option<ControlResult<Frame>>;
}

/// Opens transports for a client id
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, client_id: &str) -> ControlResult<Box<dyn Transport>>;
}

/// WebSocket connector for `{server_url}/ws/{client_id}`
#[derive(Debug, Clone)]
pub struct WsConnector {
    server_url: String,
}

impl WsConnector {
    /// `server_url` is the `ws://` or `wss://` base, e.g. `ws://127.0.0.1:8000`
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
        }
    }

    pub fn endpoint(&self, client_id: &str) -> String {
        format!(
            "{}/ws/{}",
            self.server_url.trim_end_matches('/'),
            urlencoding::encode(client_id)
        )
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, client_id: &str) -> ControlResult<Box<dyn Transport>> {
        let url = self.endpoint(client_id);
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ControlError::Transport(format!("{}: {}", url, e)))?;
        debug!(url = %url, "websocket connected");
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> ControlResult<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))
    }

    async fn next_frame(&mut self) -> Option<ControlResult<Frame>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text))),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                    return Some(Ok(Frame::Close { code, reason }));
                }
                // Protocol pings are answered by tungstenite
                Ok(_) => continue,
                Err(e) => return Some(Err(ControlError::Transport(e.to_string()))),
            }
        }
    }
}
