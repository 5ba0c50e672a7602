//! Driver trait for abstracting transport I/O.
//!
//! The [`Driver`] trait decouples the runtime from a specific transport. The
//! production driver speaks WebSocket; the simulation driver talks to an
//! in-process scripted server. The generic [`crate::Runtime`] handles all
//! orchestration for both.

use std::future::Future;

/// Text transport used by the [`Runtime`](crate::Runtime).
///
/// One driver carries at most one transport at a time. The runtime opens it
/// when the connection state machine asks for it and closes it on request;
/// it never reconnects on its own.
///
/// # Implementations
///
/// - **WebSocket**: `WsDriver` (feature `websocket`)
/// - **Simulation**: `SimDriver` in `parley-harness`
pub trait Driver: Send {
    /// Platform-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be opened.
    fn connect(&mut self, url: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed or the send fails.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receive the next text frame.
    ///
    /// Returns `None` once the transport has closed. Must be cancel-safe: the
    /// runtime polls it inside `tokio::select!`.
    fn recv_text(&mut self) -> impl Future<Output = Option<String>> + Send;

    /// Close the transport. No-op if already closed.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    /// Whether a transport is open.
    fn is_connected(&self) -> bool;
}
