//! Turmoil network transport.
//!
//! Runs the runtime and a [`SimServer`] on separate turmoil hosts so sessions
//! can be exercised under simulated latency, partitions and host crashes.
//! Frames travel as newline-terminated text over turmoil TCP; encoded frames
//! never contain a raw newline.

use std::io;

use parley_app::Driver;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, ReadHalf, WriteHalf};
use tracing::{debug, warn};
use turmoil::net::{TcpListener, TcpStream};

use crate::{sim_env::SimEnv, sim_server::SimServer};

/// Driver over a turmoil TCP connection.
#[derive(Default)]
pub struct SimTransport {
    reader: Option<Lines<BufReader<ReadHalf<TcpStream>>>>,
    writer: Option<WriteHalf<TcpStream>>,
}

impl SimTransport {
    /// Disconnected transport.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for SimTransport {
    type Error = io::Error;

    async fn connect(&mut self, url: &str) -> io::Result<()> {
        let stream = TcpStream::connect(url).await?;
        let (reader, writer) = tokio::io::split(stream);
        self.reader = Some(BufReader::new(reader).lines());
        self.writer = Some(writer);
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        write_line(writer, &text).await
    }

    async fn recv_text(&mut self) -> Option<String> {
        let reader = self.reader.as_mut()?;
        match reader.next_line().await {
            Ok(Some(line)) => Some(line),
            Ok(None) => {
                self.reader = None;
                self.writer = None;
                None
            },
            Err(err) => {
                warn!(%err, "transport read failed");
                self.reader = None;
                self.writer = None;
                None
            },
        }
    }

    async fn disconnect(&mut self) {
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    fn is_connected(&self) -> bool {
        self.reader.is_some()
    }
}

/// Serve `server` on `listener`, one connection at a time, until the host
/// stops.
///
/// Server timestamps come from `env`.
pub async fn serve(listener: TcpListener, mut server: SimServer, env: SimEnv) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "sim server accepted connection");

        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        write_line(&mut writer, &server.open()).await?;
        while let Ok(Some(line)) = lines.next_line().await {
            for reply in server.handle_text(&line, env.millis()) {
                write_line(&mut writer, &reply).await?;
            }
        }
        debug!(%peer, "sim server connection closed");
    }
}

async fn write_line(writer: &mut WriteHalf<TcpStream>, text: &str) -> io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
