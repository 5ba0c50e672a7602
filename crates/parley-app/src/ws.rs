//! WebSocket driver.
//!
//! Carries Engine.IO text frames over a plain WebSocket (no HTTP long-polling
//! upgrade). Pings and pongs at the WebSocket layer are answered by
//! tungstenite; Engine.IO heartbeats are text frames and go to the client.

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, warn};

use crate::driver::Driver;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Path and query the server expects for a WebSocket-only Engine.IO v4
/// session.
const ENGINE_IO_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

/// WebSocket driver errors.
#[derive(Debug, Error)]
pub enum WsError {
    /// Handshake or I/O failure.
    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    /// No transport is open.
    #[error("websocket not connected")]
    NotConnected,
}

impl From<tungstenite::Error> for WsError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// [`Driver`] over tokio-tungstenite.
#[derive(Default)]
pub struct WsDriver {
    socket: Option<Socket>,
}

impl WsDriver {
    /// Create a disconnected driver.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for WsDriver {
    type Error = WsError;

    async fn connect(&mut self, url: &str) -> Result<(), WsError> {
        self.disconnect().await;
        let (socket, response) = connect_async(url).await?;
        debug!(status = %response.status(), "websocket open");
        self.socket = Some(socket);
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<(), WsError> {
        let socket = self.socket.as_mut().ok_or(WsError::NotConnected)?;
        socket.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv_text(&mut self) -> Option<String> {
        let socket = self.socket.as_mut()?;
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return Some(text.to_string()),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "websocket closed by server");
                    break;
                },
                Some(Ok(_)) => {},
                Some(Err(err)) => {
                    warn!(%err, "websocket read failed");
                    break;
                },
                None => break,
            }
        }
        self.socket = None;
        None
    }

    async fn disconnect(&mut self) {
        if let Some(mut socket) = self.socket.take()
            && let Err(err) = socket.close(None).await
        {
            debug!(%err, "websocket close failed");
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}

/// WebSocket URL for a server base URL.
///
/// `http`/`https` become `ws`/`wss`. The Engine.IO path is appended unless the
/// URL already names one.
pub fn socket_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("ws://{base}")
    };

    if base.contains("/socket.io") { base } else { format!("{base}{ENGINE_IO_PATH}") }
}
