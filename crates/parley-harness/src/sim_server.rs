//! Scripted chat server for simulation.
//!
//! `SimServer` answers the operator client the way the real messaging server
//! does, in Socket.IO text frames: it completes the handshake, serves presence,
//! the conversation list and histories, stores sent messages and echoes them
//! back. Nothing here performs I/O; drivers and sessions feed it text and move
//! its replies.
//!
//! Every quirk the client has to tolerate can be switched on through
//! [`SimServerConfig`]: untagged history responses, failed history lookups,
//! messages without a sender role, echoes without the correlation id, dropped echoes, and responses held back so a test can
//! release them late or out of order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use parley_proto::{
    ChatHistory, ChatListEntry, Command, ErrorResponse, Handshake, HistoryRequest, Packet,
    SendMessage, ServerEvent, SocketPacket, WireMessage, WireRole, WireTime, WireUser,
};
use tracing::{debug, warn};

/// Operator id used by [`SimServerConfig::default`].
pub const DEFAULT_OPERATOR_ID: &str = "op";

/// Server behavior switches.
#[derive(Debug, Clone)]
pub struct SimServerConfig {
    /// Id the server assigns to the operator.
    pub operator_id: String,
    /// Reject every credential with this message.
    pub rejection: Option<String>,
    /// Tag history responses with the conversation id.
    pub tag_history: bool,
    /// Label messages with `senderRole`.
    pub label_roles: bool,
    /// Answer history requests for these users with `errorResponse`.
    pub failing_history: BTreeSet<String>,
    /// Copy the client's correlation id into echoes.
    pub echo_correlation: bool,
    /// Echo sent messages back at all.
    pub echo_sends: bool,
    /// Hold history responses until [`SimServer::release_held`].
    pub hold_history: bool,
    /// Hold echoes until [`SimServer::release_held`].
    pub hold_echoes: bool,
    /// Advertised ping interval in milliseconds.
    pub ping_interval: u64,
    /// Advertised ping timeout in milliseconds.
    pub ping_timeout: u64,
}

impl Default for SimServerConfig {
    fn default() -> Self {
        Self {
            operator_id: DEFAULT_OPERATOR_ID.to_string(),
            rejection: None,
            tag_history: true,
            label_roles: true,
            failing_history: BTreeSet::new(),
            echo_correlation: true,
            echo_sends: true,
            hold_history: false,
            hold_echoes: false,
            ping_interval: 25_000,
            ping_timeout: 20_000,
        }
    }
}

/// Scripted chat server.
#[derive(Debug, Clone)]
pub struct SimServer {
    config: SimServerConfig,
    users: BTreeMap<String, WireUser>,
    chats: BTreeMap<String, Vec<WireMessage>>,
    unread: BTreeMap<String, u32>,
    online: BTreeSet<String>,
    /// Frames held back for later release
    held: VecDeque<String>,
    /// Commands received, in order
    received: Vec<Command>,
    next_message_id: u64,
    sessions: u64,
}

impl Default for SimServer {
    fn default() -> Self {
        Self::new(SimServerConfig::default())
    }
}

impl SimServer {
    /// Create a server with no users.
    pub fn new(config: SimServerConfig) -> Self {
        Self {
            config,
            users: BTreeMap::new(),
            chats: BTreeMap::new(),
            unread: BTreeMap::new(),
            online: BTreeSet::new(),
            held: VecDeque::new(),
            received: Vec::new(),
            next_message_id: 0,
            sessions: 0,
        }
    }

    /// Behavior switches.
    pub fn config(&self) -> &SimServerConfig {
        &self.config
    }

    /// Change behavior mid-run.
    pub fn config_mut(&mut self) -> &mut SimServerConfig {
        &mut self.config
    }

    /// Register an end-user.
    pub fn add_user(&mut self, id: &str, first_name: &str, last_name: &str) {
        self.users.insert(id.to_string(), WireUser {
            id: id.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: Some(format!("{id}@example.com")),
        });
    }

    /// Replace the online set.
    pub fn set_online<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        self.online = ids.into_iter().map(str::to_string).collect();
    }

    /// Stored conversation with `user`, oldest first.
    pub fn chat(&self, user: &str) -> &[WireMessage] {
        self.chats.get(user).map_or(&[], Vec::as_slice)
    }

    /// Commands received so far.
    pub fn received(&self) -> &[Command] {
        &self.received
    }

    /// Drain received commands.
    pub fn take_received(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.received)
    }

    /// Number of transport sessions opened.
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Number of held frames.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Release held frames in the order they were held.
    pub fn release_held(&mut self) -> Vec<String> {
        self.held.drain(..).collect()
    }

    /// Release held frames newest first.
    pub fn release_held_reversed(&mut self) -> Vec<String> {
        self.held.drain(..).rev().collect()
    }

    /// Engine.IO open packet for a new transport session.
    pub fn open(&mut self) -> String {
        self.sessions += 1;
        // Frames held for the previous connection died with it
        self.held.clear();
        let handshake = Handshake {
            sid: format!("eio-{}", self.sessions),
            upgrades: vec![],
            ping_interval: self.config.ping_interval,
            ping_timeout: self.config.ping_timeout,
        };
        encode(&Packet::Open(handshake)).unwrap_or_default()
    }

    /// Handle one frame from the client and return the immediate replies.
    ///
    /// `now_millis` stamps any message the frame creates.
    pub fn handle_text(&mut self, text: &str, now_millis: u64) -> Vec<String> {
        let packet = match Packet::decode(text) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(%err, text, "server dropping malformed frame");
                return vec![];
            },
        };

        match packet {
            Packet::Message(SocketPacket::Connect(_)) => self.accept(),
            Packet::Message(SocketPacket::Event { name, args }) => {
                match Command::decode(&name, args) {
                    Ok(command) => {
                        self.received.push(command.clone());
                        self.dispatch(command, now_millis)
                    },
                    Err(err) => {
                        warn!(%err, "server dropping unknown event");
                        self.frames([ServerEvent::ErrorResponse(ErrorResponse {
                            message: err.to_string(),
                        })])
                    },
                }
            },
            Packet::Ping => encode(&Packet::Pong).into_iter().collect(),
            _ => vec![],
        }
    }

    /// An end-user writes to the operator. Returns the live frame.
    pub fn user_message(&mut self, user: &str, body: &str, now_millis: u64) -> String {
        let message = self.store(WireMessage {
            id: None,
            sender_id: user.to_string(),
            receiver_id: self.config.operator_id.clone(),
            sender_role: self.config.label_roles.then_some(WireRole::User),
            message: body.to_string(),
            timestamp: Some(WireTime::Millis(now_millis)),
            created_at: None,
            updated_at: None,
            client_message_id: None,
        });
        *self.unread.entry(user.to_string()).or_default() += 1;
        self.frame(ServerEvent::ReceiveMessage(message)).unwrap_or_default()
    }

    /// Presence push.
    pub fn presence_frame(&self) -> String {
        self.frame(ServerEvent::OnlineUsers(self.online.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Full list push (`update_chat_list` with entries).
    pub fn list_update_frame(&self) -> String {
        self.frame(ServerEvent::ChatListUpdated(Some(self.list()))).unwrap_or_default()
    }

    /// Refetch trigger (`update_chat_list` without payload).
    pub fn list_trigger_frame(&self) -> String {
        self.frame(ServerEvent::ChatListUpdated(None)).unwrap_or_default()
    }

    /// Request-level error push.
    pub fn error_frame(&self, message: &str) -> String {
        self.frame(ServerEvent::ErrorResponse(ErrorResponse { message: message.to_string() }))
            .unwrap_or_default()
    }

    /// Engine.IO ping.
    pub fn ping_frame(&self) -> String {
        encode(&Packet::Ping).unwrap_or_default()
    }

    /// Socket.IO disconnect: the server ends the session.
    pub fn disconnect_frame(&self) -> String {
        encode(&Packet::Message(SocketPacket::Disconnect)).unwrap_or_default()
    }

    /// Current conversation list.
    pub fn list(&self) -> Vec<ChatListEntry> {
        let ids: BTreeSet<&String> = self.users.keys().chain(self.chats.keys()).collect();
        ids.into_iter()
            .map(|id| {
                let last = self.chats.get(id).and_then(|chat| chat.last());
                ChatListEntry {
                    id: format!("chat-{id}"),
                    user: self.users.get(id).cloned().unwrap_or_else(|| WireUser {
                        id: id.clone(),
                        first_name: String::new(),
                        last_name: String::new(),
                        email: None,
                    }),
                    last_message: last.map(|m| m.message.clone()),
                    last_message_at: last.and_then(|m| m.timestamp.clone()),
                    unread_count: self.unread.get(id).copied().unwrap_or(0),
                }
            })
            .collect()
    }

    fn accept(&mut self) -> Vec<String> {
        let packet = match &self.config.rejection {
            Some(message) => {
                debug!(%message, "server rejecting credential");
                Packet::Message(SocketPacket::ConnectError { message: message.clone() })
            },
            None => {
                let ack = serde_json::json!({ "sid": format!("sio-{}", self.sessions) });
                Packet::Message(SocketPacket::Connect(Some(ack)))
            },
        };
        encode(&packet).into_iter().collect()
    }

    fn dispatch(&mut self, command: Command, now_millis: u64) -> Vec<String> {
        match command {
            Command::RequestPresence => {
                self.frames([ServerEvent::OnlineUsers(self.online.iter().cloned().collect())])
            },
            Command::RequestChatList(_) => self.frames([ServerEvent::ChatList(self.list())]),
            Command::RequestHistory(request) => self.history(request),
            Command::SendMessage(send) => self.accept_send(send, now_millis),
        }
    }

    fn history(&mut self, request: HistoryRequest) -> Vec<String> {
        let user_id = request.user_id;
        if self.config.failing_history.contains(&user_id) {
            debug!(user = %user_id, "failing history request");
            return self.frames([ServerEvent::ErrorResponse(ErrorResponse {
                message: format!("no history for {user_id}"),
            })]);
        }
        self.unread.remove(&user_id);

        let history = ChatHistory {
            user_id: self.config.tag_history.then(|| user_id.clone()),
            messages: self.chat(&user_id).to_vec(),
        };
        let frames = self.frames([ServerEvent::ChatHistory(history)]);

        if self.config.hold_history {
            self.held.extend(frames);
            vec![]
        } else {
            frames
        }
    }

    fn accept_send(&mut self, send: SendMessage, now_millis: u64) -> Vec<String> {
        let client_message_id =
            if self.config.echo_correlation { send.client_message_id } else { None };
        let message = self.store(WireMessage {
            id: None,
            sender_id: self.config.operator_id.clone(),
            receiver_id: send.receiver_id,
            sender_role: self.config.label_roles.then_some(WireRole::Admin),
            message: send.message,
            timestamp: Some(WireTime::Millis(now_millis)),
            created_at: None,
            updated_at: None,
            client_message_id,
        });

        if !self.config.echo_sends {
            return vec![];
        }

        let frames = self.frames([ServerEvent::ReceiveMessage(message)]);
        if self.config.hold_echoes {
            self.held.extend(frames);
            vec![]
        } else {
            frames
        }
    }

    /// Assign an id and append to the conversation.
    fn store(&mut self, mut message: WireMessage) -> WireMessage {
        self.next_message_id += 1;
        message.id = Some(format!("m{}", self.next_message_id));
        let conversation = message.conversation_id(Some(&self.config.operator_id)).to_string();
        self.chats.entry(conversation).or_default().push(message.clone());
        message
    }

    fn frame(&self, event: ServerEvent) -> Option<String> {
        event
            .into_packet()
            .and_then(|packet| packet.encode())
            .inspect_err(|err| warn!(%err, "server failed to encode event"))
            .ok()
    }

    fn frames<const N: usize>(&self, events: [ServerEvent; N]) -> Vec<String> {
        events.into_iter().filter_map(|event| self.frame(event)).collect()
    }
}

fn encode(packet: &Packet) -> Option<String> {
    packet.encode().inspect_err(|err| warn!(%err, "server failed to encode packet")).ok()
}
