//! Transport connection state machine.
//!
//! Manages the Engine.IO / Socket.IO session over one WebSocket: open
//! handshake, namespace connect with the bearer credential, heartbeats, idle
//! detection and reconnection. Uses the action pattern: methods take time as
//! input and return actions for the driver to execute. No I/O happens here.
//!
//! # State Machine
//!
//! ```text
//!                connect()
//! ┌──────────────┐ ───────> ┌────────────┐  connect ack  ┌───────────┐
//! │ Disconnected │          │ Connecting │──────────────>│ Connected │
//! └──────────────┘ <──┐     └────────────┘               └───────────┘
//!        ^            │       │  ^     │ connect error       │
//!        │ exhausted  │       │  │     ↓                     │ lost / idle
//!        │            │ fail  │  │  ┌────────┐               │
//!        │            │       ↓  │  │ Closed │<── close() ── any
//!        │         ┌──────────┐  │  └────────┘               │
//!        └─────────│ Degraded │<─┼───────────────────────────┘
//!                  └──────────┘  │ backoff elapsed
//!                        └───────┘
//! ```
//!
//! Every failure while Connecting or Connected goes through [`Backoff`]. The
//! first successful connect emits `Established { resync: false }`, every later
//! one `Established { resync: true }` so the client can refresh what it may
//! have missed.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use parley_proto::{Packet, ServerEvent, SocketPacket};
use tracing::{debug, info, warn};

use crate::{
    backoff::{Backoff, BackoffConfig},
    env::Environment,
    error::ConnectionError,
};

/// Time allowed from opening the transport to the Socket.IO connect ack.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle timeout used when the server handshake does not advertise heartbeat
/// timing.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    /// Open the underlying transport (WebSocket).
    OpenTransport,

    /// Close the underlying transport.
    CloseTransport,

    /// Encode and send this packet.
    Send(Packet),

    /// Connection state changed.
    StateChanged(ConnectionState),

    /// Session is usable. `resync` is true on every connect after the first.
    Established {
        /// Whether this is a reconnect.
        resync: bool,
    },

    /// Chat event from the server.
    Inbound(ServerEvent),

    /// An attempt failed and a retry is scheduled.
    Retrying {
        /// Retry number (1 based).
        attempt: u32,
        /// Delay before the retry.
        delay: Duration,
        /// Why the attempt failed.
        error: ConnectionError,
    },

    /// Connection failed for good. Reported exactly once per failure.
    Failed(ConnectionError),
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    Disconnected,
    /// Transport opening or handshake in flight.
    Connecting,
    /// Session established.
    Connected,
    /// Connection lost, waiting to retry.
    Degraded,
    /// Closed by the caller or by the server rejecting the credential.
    Closed,
}

/// Progress of the handshake while `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    /// Waiting for the Engine.IO open packet.
    AwaitingOpen,
    /// Socket.IO connect sent, waiting for the ack.
    AwaitingAck,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for completing the handshake
    pub handshake_timeout: Duration,
    /// Idle timeout when the server does not advertise one
    pub idle_timeout: Duration,
    /// Reconnect policy
    pub backoff: BackoffConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Connection state machine
///
/// Pure state machine. Time is passed as parameters; randomness for jitter
/// comes from the caller's [`Environment`].
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct Connection<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: ConnectionState,
    handshake: Handshake,
    config: ConnectionConfig,
    /// Bearer credential. Held while the caller wants to be connected.
    credential: Option<String>,
    /// Start of the current attempt
    attempt_started: I,
    /// Last inbound packet
    last_activity: I,
    /// Idle timeout negotiated in the handshake
    idle_timeout: Duration,
    /// Pending retry: when it was armed, and the delay
    retry: Option<(I, Duration)>,
    backoff: Backoff,
    /// Whether this session has been established at least once
    established_once: bool,
    /// Engine.IO session id
    session_id: Option<String>,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new connection in [`ConnectionState::Disconnected`] state
    pub fn new(now: I, config: ConnectionConfig) -> Self {
        let backoff = Backoff::new(config.backoff.clone());
        let idle_timeout = config.idle_timeout;
        Self {
            state: ConnectionState::Disconnected,
            handshake: Handshake::AwaitingOpen,
            config,
            credential: None,
            attempt_started: now,
            last_activity: now,
            idle_timeout,
            retry: None,
            backoff,
            established_once: false,
            session_id: None,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Engine.IO session id of the current (or last) transport.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Idle timeout in effect.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Reconnect attempts made since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.backoff.attempt()
    }

    /// Whether the driver should have a transport open.
    pub fn wants_transport(&self) -> bool {
        matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected)
    }

    /// Start connecting with the given bearer credential.
    ///
    /// The credential is opaque: it is forwarded to the server and never
    /// inspected.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` unless `Disconnected` or `Closed`
    pub fn connect(
        &mut self,
        credential: impl Into<String>,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if !matches!(self.state, ConnectionState::Disconnected | ConnectionState::Closed) {
            return Err(ConnectionError::InvalidState { state: self.state, operation: "connect" });
        }

        self.credential = Some(credential.into());
        self.backoff.reset();
        self.established_once = false;

        Ok(self.begin_attempt(now))
    }

    /// Close the connection. Idempotent.
    ///
    /// Disarms the reconnect timer and forgets the credential.
    pub fn close(&mut self) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Closed {
            return vec![];
        }

        let mut actions = Vec::new();
        if self.state == ConnectionState::Connected {
            actions.push(ConnectionAction::Send(Packet::Message(SocketPacket::Disconnect)));
        }
        if self.wants_transport() {
            actions.push(ConnectionAction::CloseTransport);
        }

        info!(from = ?self.state, "connection closed");
        self.state = ConnectionState::Closed;
        self.retry = None;
        self.credential = None;
        actions.push(ConnectionAction::StateChanged(ConnectionState::Closed));
        actions
    }

    /// The driver opened the transport.
    pub fn transport_opened(&mut self, now: I) {
        if self.state == ConnectionState::Connecting {
            self.last_activity = now;
        }
    }

    /// The transport failed to open or dropped.
    ///
    /// Ignored unless a transport is expected to be up.
    pub fn transport_closed<E: Environment>(
        &mut self,
        reason: &str,
        env: &E,
        now: I,
    ) -> Vec<ConnectionAction> {
        if !self.wants_transport() {
            debug!(state = ?self.state, reason, "ignoring transport close");
            return vec![];
        }

        self.fail_attempt(ConnectionError::Transport(reason.to_string()), env, now)
    }

    /// Process one text message from the transport.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Protocol` if the text is not a valid packet or the
    ///   event payload is malformed
    /// - `ConnectionError::UnexpectedPacket` if the packet is invalid for the
    ///   current state
    pub fn handle_text<E: Environment>(
        &mut self,
        text: &str,
        env: &E,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let packet = Packet::decode(text)?;
        self.handle_packet(packet, env, now)
    }

    /// Process one decoded packet.
    ///
    /// # Errors
    ///
    /// See [`Connection::handle_text`].
    pub fn handle_packet<E: Environment>(
        &mut self,
        packet: Packet,
        env: &E,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if !self.wants_transport() {
            return Err(ConnectionError::UnexpectedPacket {
                state: self.state,
                packet: packet_kind(&packet),
            });
        }

        self.last_activity = now;

        match (self.state, self.handshake, packet) {
            (ConnectionState::Connecting, Handshake::AwaitingOpen, Packet::Open(handshake)) => {
                let advertised = handshake.ping_interval.saturating_add(handshake.ping_timeout);
                self.idle_timeout = if advertised == 0 {
                    self.config.idle_timeout
                } else {
                    Duration::from_millis(advertised)
                };
                self.session_id = Some(handshake.sid);
                self.handshake = Handshake::AwaitingAck;

                let Some(credential) = self.credential.as_deref() else {
                    return Err(ConnectionError::Protocol(
                        "transport open without a credential".to_string(),
                    ));
                };

                debug!(idle_timeout = ?self.idle_timeout, "transport open, sending connect");
                Ok(vec![ConnectionAction::Send(Packet::connect(credential))])
            },

            (
                ConnectionState::Connecting,
                Handshake::AwaitingAck,
                Packet::Message(SocketPacket::Connect(_)),
            ) => Ok(self.established()),

            (ConnectionState::Connecting, _, Packet::Message(SocketPacket::ConnectError { message })) => {
                warn!(%message, "server rejected credential");
                self.state = ConnectionState::Closed;
                self.retry = None;
                self.credential = None;
                Ok(vec![
                    ConnectionAction::CloseTransport,
                    ConnectionAction::StateChanged(ConnectionState::Closed),
                    ConnectionAction::Failed(ConnectionError::Rejected { message }),
                ])
            },

            (_, _, Packet::Ping) => Ok(vec![ConnectionAction::Send(Packet::Pong)]),

            (_, _, Packet::Pong | Packet::Noop) => Ok(vec![]),

            (ConnectionState::Connected, _, Packet::Message(SocketPacket::Event { name, args })) => {
                let event = ServerEvent::decode(&name, args)?;
                Ok(vec![ConnectionAction::Inbound(event)])
            },

            // Repeated ack; the session is already up
            (ConnectionState::Connected, _, Packet::Message(SocketPacket::Connect(_))) => {
                Ok(vec![])
            },

            (_, _, Packet::Close | Packet::Message(SocketPacket::Disconnect)) => {
                let mut actions = vec![ConnectionAction::CloseTransport];
                actions.extend(self.fail_attempt(
                    ConnectionError::Transport("server closed the session".to_string()),
                    env,
                    now,
                ));
                Ok(actions)
            },

            (state, _, packet) => {
                Err(ConnectionError::UnexpectedPacket { state, packet: packet_kind(&packet) })
            },
        }
    }

    /// Process periodic maintenance (timeouts and scheduled reconnects).
    pub fn tick<E: Environment>(&mut self, env: &E, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connecting => {
                let elapsed = now - self.attempt_started;
                if elapsed <= self.config.handshake_timeout {
                    return vec![];
                }
                let mut actions = vec![ConnectionAction::CloseTransport];
                actions.extend(self.fail_attempt(
                    ConnectionError::HandshakeTimeout { elapsed },
                    env,
                    now,
                ));
                actions
            },
            ConnectionState::Connected => {
                let elapsed = now - self.last_activity;
                if elapsed <= self.idle_timeout {
                    return vec![];
                }
                let mut actions = vec![ConnectionAction::CloseTransport];
                actions.extend(self.fail_attempt(ConnectionError::IdleTimeout { elapsed }, env, now));
                actions
            },
            ConnectionState::Degraded => match self.retry {
                Some((armed, delay)) if now - armed >= delay => {
                    self.retry = None;
                    info!(attempt = self.backoff.attempt(), "reconnecting");
                    self.begin_attempt(now)
                },
                _ => vec![],
            },
            ConnectionState::Disconnected | ConnectionState::Closed => vec![],
        }
    }

    fn begin_attempt(&mut self, now: I) -> Vec<ConnectionAction> {
        self.state = ConnectionState::Connecting;
        self.handshake = Handshake::AwaitingOpen;
        self.attempt_started = now;
        self.last_activity = now;
        self.idle_timeout = self.config.idle_timeout;

        vec![
            ConnectionAction::StateChanged(ConnectionState::Connecting),
            ConnectionAction::OpenTransport,
        ]
    }

    fn established(&mut self) -> Vec<ConnectionAction> {
        let resync = self.established_once;
        self.established_once = true;
        self.state = ConnectionState::Connected;
        self.backoff.reset();

        info!(sid = ?self.session_id, resync, "session established");
        vec![
            ConnectionAction::StateChanged(ConnectionState::Connected),
            ConnectionAction::Established { resync },
        ]
    }

    /// Schedule a retry, or give up once the backoff is exhausted.
    fn fail_attempt<E: Environment>(
        &mut self,
        error: ConnectionError,
        env: &E,
        now: I,
    ) -> Vec<ConnectionAction> {
        match self.backoff.next_delay(env.random_u64()) {
            Some(delay) => {
                let attempt = self.backoff.attempt();
                warn!(%error, attempt, ?delay, "connection attempt failed, retrying");
                self.state = ConnectionState::Degraded;
                self.retry = Some((now, delay));
                vec![
                    ConnectionAction::StateChanged(ConnectionState::Degraded),
                    ConnectionAction::Retrying { attempt, delay, error },
                ]
            },
            None => {
                let attempts = self.backoff.attempt();
                warn!(%error, attempts, "giving up on connection");
                self.state = ConnectionState::Disconnected;
                self.retry = None;
                self.credential = None;
                vec![
                    ConnectionAction::StateChanged(ConnectionState::Disconnected),
                    ConnectionAction::Failed(ConnectionError::RetriesExhausted {
                        attempts,
                        last: error.to_string(),
                    }),
                ]
            },
        }
    }
}

fn packet_kind(packet: &Packet) -> &'static str {
    match packet {
        Packet::Open(_) => "open",
        Packet::Close => "close",
        Packet::Ping => "ping",
        Packet::Pong => "pong",
        Packet::Noop => "noop",
        Packet::Message(SocketPacket::Connect(_)) => "connect",
        Packet::Message(SocketPacket::Disconnect) => "disconnect",
        Packet::Message(SocketPacket::Event { .. }) => "event",
        Packet::Message(SocketPacket::ConnectError { .. }) => "connect error",
    }
}
