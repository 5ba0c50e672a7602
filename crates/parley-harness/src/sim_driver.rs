//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` connects the production [`parley_app::Runtime`] to an
//! in-process [`SimServer`], so the same orchestration code runs in
//! production and in simulation. Tests script the server and the network
//! through a [`SimRemote`] that shares the driver's state.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use parley_app::Driver;
use tokio::sync::Notify;

use crate::{sim_env::SimEnv, sim_server::SimServer};

/// Error type for simulation driver.
#[derive(Debug, Clone)]
pub struct SimDriverError(pub String);

impl std::fmt::Display for SimDriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimDriverError: {}", self.0)
    }
}

impl std::error::Error for SimDriverError {}

/// State shared between the driver and its remotes.
struct SharedState {
    server: SimServer,
    inbound: VecDeque<String>,
    sent: Vec<String>,
    connected: bool,
    reachable: bool,
    connects: u32,
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<SharedState>>,
    wake: Arc<Notify>,
    env: SimEnv,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Simulation driver for deterministic testing.
pub struct SimDriver {
    shared: Shared,
}

impl SimDriver {
    /// Driver talking to `server`. Server timestamps come from `env`.
    pub fn new(server: SimServer, env: SimEnv) -> Self {
        let state = SharedState {
            server,
            inbound: VecDeque::new(),
            sent: Vec::new(),
            connected: false,
            reachable: true,
            connects: 0,
        };
        Self {
            shared: Shared { state: Arc::new(Mutex::new(state)), wake: Arc::new(Notify::new()), env },
        }
    }

    /// Test-side handle sharing this driver's server and network.
    pub fn remote(&self) -> SimRemote {
        SimRemote { shared: self.shared.clone() }
    }
}

impl Driver for SimDriver {
    type Error = SimDriverError;

    async fn connect(&mut self, _url: &str) -> Result<(), SimDriverError> {
        let mut state = self.shared.lock();
        if !state.reachable {
            return Err(SimDriverError("server unreachable".into()));
        }
        state.connected = true;
        state.connects += 1;
        state.inbound.clear();
        let open = state.server.open();
        state.inbound.push_back(open);
        drop(state);

        self.shared.wake.notify_one();
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<(), SimDriverError> {
        let millis = self.shared.env.millis();
        let mut state = self.shared.lock();
        if !state.connected {
            return Err(SimDriverError("not connected".into()));
        }
        let replies = state.server.handle_text(&text, millis);
        state.sent.push(text);
        let woke = !replies.is_empty();
        state.inbound.extend(replies);
        drop(state);

        if woke {
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    async fn recv_text(&mut self) -> Option<String> {
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(text) = state.inbound.pop_front() {
                    return Some(text);
                }
                if !state.connected {
                    return None;
                }
            }
            self.shared.wake.notified().await;
        }
    }

    async fn disconnect(&mut self) {
        let mut state = self.shared.lock();
        state.connected = false;
        state.inbound.clear();
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}

/// Test-side control over a [`SimDriver`]'s server and network.
#[derive(Clone)]
pub struct SimRemote {
    shared: Shared,
}

impl SimRemote {
    /// Run `f` against the server and deliver whatever frames it returns.
    pub fn with_server<R>(&self, f: impl FnOnce(&mut SimServer, u64) -> R) -> R {
        let millis = self.shared.env.millis();
        let mut state = self.shared.lock();
        f(&mut state.server, millis)
    }

    /// Deliver a frame to the client. Dropped if the transport is down.
    pub fn push(&self, frame: String) {
        let mut state = self.shared.lock();
        if state.connected {
            state.inbound.push_back(frame);
            drop(state);
            self.shared.wake.notify_one();
        }
    }

    /// An end-user writes to the operator.
    pub fn user_writes(&self, user: &str, body: &str) {
        let frame = self.with_server(|server, now| server.user_message(user, body, now));
        self.push(frame);
    }

    /// Deliver every held frame, oldest first.
    pub fn release_held(&self) {
        for frame in self.with_server(|server, _| server.release_held()) {
            self.push(frame);
        }
    }

    /// Cut the connection. The client sees the transport close.
    pub fn drop_connection(&self) {
        let mut state = self.shared.lock();
        state.connected = false;
        state.inbound.clear();
        drop(state);
        self.shared.wake.notify_one();
    }

    /// Make later connects succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.lock().reachable = reachable;
    }

    /// Whether the transport is up.
    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Number of successful transport opens.
    pub fn connects(&self) -> u32 {
        self.shared.lock().connects
    }

    /// Drain the frames the client sent.
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.shared.lock().sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> SimDriver {
        SimDriver::new(SimServer::default(), SimEnv::new())
    }

    #[tokio::test]
    async fn connect_queues_open_handshake() {
        let mut driver = driver();
        driver.connect("sim://").await.unwrap();

        assert!(driver.is_connected());
        assert!(driver.recv_text().await.unwrap().starts_with(r#"0{"sid""#));
    }

    #[tokio::test]
    async fn sends_reach_the_server_and_replies_come_back() {
        let mut driver = driver();
        let remote = driver.remote();
        driver.connect("sim://").await.unwrap();
        driver.recv_text().await.unwrap();

        driver.send_text(r#"40{"token":"Bearer t"}"#.into()).await.unwrap();
        assert_eq!(driver.recv_text().await.unwrap(), r#"40{"sid":"sio-1"}"#);
        assert_eq!(remote.take_sent().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_server_fails_connect() {
        let mut driver = driver();
        driver.remote().set_reachable(false);

        assert!(driver.connect("sim://").await.is_err());
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn dropped_connection_ends_receive() {
        let mut driver = driver();
        let remote = driver.remote();
        driver.connect("sim://").await.unwrap();

        remote.drop_connection();
        assert_eq!(driver.recv_text().await, None);
    }

    #[tokio::test]
    async fn send_after_disconnect_fails() {
        let mut driver = driver();
        driver.connect("sim://").await.unwrap();
        driver.disconnect().await;

        assert!(driver.send_text("2".into()).await.is_err());
    }
}
