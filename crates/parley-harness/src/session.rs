//! Step-by-step session simulation.
//!
//! `SimSession` wires a [`Client`] straight to a [`SimServer`] with no async
//! runtime in between. Frames the server sends are queued, and the test
//! decides when they are delivered: one at a time, all at once, or never
//! (dropped with the transport). Time only moves through
//! [`SimSession::advance`]. Invariants are checked after every step.

use std::collections::VecDeque;

use parley_client::{
    Client, ClientAction, ClientConfig, ClientError, ClientEvent, ConversationId, LocalId, Notice,
};
use tracing::debug;

use crate::{
    invariants::{InvariantRegistry, SessionSnapshot},
    sim_env::{SimEnv, SimInstant},
    sim_server::SimServer,
};

/// Client and scripted server in lockstep.
pub struct SimSession {
    env: SimEnv,
    client: Client<SimEnv>,
    server: SimServer,
    /// Server frames not yet delivered
    inbound: VecDeque<String>,
    /// Every frame the client put on the wire
    sent: Vec<String>,
    notices: Vec<Notice>,
    transport_up: bool,
    /// Whether opening a transport succeeds
    reachable: bool,
    invariants: InvariantRegistry,
}

impl SimSession {
    /// Session with default client configuration and the standard invariants.
    pub fn new(env: SimEnv, server: SimServer) -> Self {
        Self::with_config(env, server, ClientConfig::default())
    }

    /// Session with a specific client configuration.
    pub fn with_config(env: SimEnv, server: SimServer, config: ClientConfig) -> Self {
        let client = Client::new(env.clone(), config);
        Self {
            env,
            client,
            server,
            inbound: VecDeque::new(),
            sent: Vec::new(),
            notices: Vec::new(),
            transport_up: false,
            reachable: true,
            invariants: InvariantRegistry::standard(),
        }
    }

    /// The client.
    pub fn client(&self) -> &Client<SimEnv> {
        &self.client
    }

    /// The server.
    pub fn server(&self) -> &SimServer {
        &self.server
    }

    /// The server, for scripting.
    pub fn server_mut(&mut self) -> &mut SimServer {
        &mut self.server
    }

    /// The environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Whether the simulated transport is open.
    pub fn transport_up(&self) -> bool {
        self.transport_up
    }

    /// Server frames waiting for delivery.
    pub fn in_flight(&self) -> usize {
        self.inbound.len()
    }

    /// Drain the frames the client sent.
    pub fn take_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }

    /// Drain notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Make later transport opens succeed or fail.
    pub fn set_reachable(&mut self, reachable: bool) {
        self.reachable = reachable;
    }

    /// Connect and deliver everything until the session settles.
    pub fn connect(&mut self, credential: &str) -> Result<(), ClientError> {
        self.step(ClientEvent::Connect { credential: credential.to_string() })?;
        self.deliver_all();
        Ok(())
    }

    /// Select a conversation. Responses stay in flight.
    pub fn select(&mut self, id: &str) -> Result<(), ClientError> {
        self.step(ClientEvent::SelectConversation(ConversationId::from(id)))
    }

    /// Send a message. Responses stay in flight.
    pub fn send(&mut self, id: &str, body: &str) -> Result<LocalId, ClientError> {
        let (local_id, actions) =
            self.client.send(ConversationId::from(id), body.to_string())?;
        self.execute(actions);
        self.check("send");
        Ok(local_id)
    }

    /// Ask for fresh presence and list.
    pub fn refresh(&mut self) {
        let _ = self.step(ClientEvent::RefreshConversations);
    }

    /// Close the session.
    pub fn close(&mut self) {
        let _ = self.step(ClientEvent::Close);
    }

    /// Move time forward and tick the client.
    pub fn advance(&mut self, by: std::time::Duration) {
        let now = self.env.advance(by);
        let _ = self.step(ClientEvent::Tick { now });
    }

    /// Queue a server push for delivery. Dropped if the transport is down.
    pub fn push(&mut self, frame: String) {
        if self.transport_up {
            self.inbound.push_back(frame);
        }
    }

    /// An end-user writes; the live frame is queued.
    pub fn user_writes(&mut self, user: &str, body: &str) {
        let frame = self.server.user_message(user, body, self.env.millis());
        self.push(frame);
    }

    /// Queue every frame the server is holding back, oldest first.
    pub fn release_held(&mut self) {
        let frames = self.server.release_held();
        for frame in frames {
            self.push(frame);
        }
    }

    /// Queue every held frame, newest first.
    pub fn release_held_reversed(&mut self) {
        let frames = self.server.release_held_reversed();
        for frame in frames {
            self.push(frame);
        }
    }

    /// Deliver the oldest in-flight frame. Returns false if none was queued.
    pub fn deliver_one(&mut self) -> bool {
        let Some(frame) = self.inbound.pop_front() else {
            return false;
        };
        let _ = self.step(ClientEvent::TextReceived(frame));
        true
    }

    /// Deliver frames until nothing is in flight.
    pub fn deliver_all(&mut self) {
        while self.deliver_one() {}
    }

    /// The transport drops. In-flight frames are lost.
    pub fn drop_transport(&mut self) {
        self.transport_up = false;
        self.inbound.clear();
        let _ = self.step(ClientEvent::TransportClosed { reason: "connection reset".into() });
    }

    /// Snapshot of the client's observable state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(&self.client)
    }

    fn step(&mut self, event: ClientEvent<SimInstant>) -> Result<(), ClientError> {
        let context = format!("{event:?}");
        let actions = self.client.handle(event)?;
        self.execute(actions);
        self.check(&context);
        Ok(())
    }

    fn execute(&mut self, actions: Vec<ClientAction>) {
        let mut pending: VecDeque<ClientAction> = actions.into();

        while let Some(action) = pending.pop_front() {
            match action {
                ClientAction::OpenTransport => {
                    let event = if self.reachable {
                        self.transport_up = true;
                        self.inbound.push_back(self.server.open());
                        ClientEvent::TransportOpened
                    } else {
                        ClientEvent::TransportClosed { reason: "unreachable".into() }
                    };
                    if let Ok(actions) = self.client.handle(event) {
                        pending.extend(actions);
                    }
                },
                ClientAction::CloseTransport => {
                    self.transport_up = false;
                    self.inbound.clear();
                },
                ClientAction::SendText(text) => {
                    if !self.transport_up {
                        debug!(%text, "dropping frame, transport is down");
                        continue;
                    }
                    let replies = self.server.handle_text(&text, self.env.millis());
                    self.sent.push(text);
                    self.inbound.extend(replies);
                },
                ClientAction::StoreChanged(_) => {},
                ClientAction::Notice(notice) => self.notices.push(notice),
            }
        }
    }

    fn check(&self, context: &str) {
        self.invariants.assert_all(&self.snapshot(), &format!("after {context}"));
    }
}
