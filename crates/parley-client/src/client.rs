//! Client state machine.
//!
//! The `Client` owns one operator session: the connection state machine, the
//! conversation store and every component that mutates it. It routes inbound
//! server events to the right component and turns operator intents into
//! commands.

use std::collections::HashSet;

use parley_core::{Connection, ConnectionAction, ConnectionError, ConnectionState, Environment};
use parley_proto::{ChatHistory, ChatListRequest, Command, ServerEvent, WireMessage};
use tracing::{debug, error, info, warn};

use crate::{
    aggregator::ListAggregator,
    config::ClientConfig,
    error::ClientError,
    event::{ClientAction, ClientEvent, Notice},
    hydrator::HistoryHydrator,
    outbound::OutboundCoordinator,
    presence::PresenceTracker,
    store::ConversationStore,
    types::{ConversationId, DeliveryState, LocalId, Message, Role, ServerId},
};

/// Operator session.
///
/// Generic over `E: Environment` so the same logic runs against the system
/// clock in production and a virtual clock in simulation.
pub struct Client<E: Environment> {
    env: E,
    config: ClientConfig,
    connection: Connection<E::Instant>,
    store: ConversationStore,
    presence: PresenceTracker,
    hydrator: HistoryHydrator,
    outbound: OutboundCoordinator<E::Instant>,
    aggregator: ListAggregator,
    /// Session-unique prefix for correlation ids.
    correlation_prefix: String,
}

impl<E: Environment> Client<E> {
    /// Create a disconnected client.
    pub fn new(env: E, config: ClientConfig) -> Self {
        let now = env.now();
        let correlation_prefix = format!("{:016x}", env.random_u64());
        let connection = Connection::new(now, config.connection.clone());
        let outbound = OutboundCoordinator::new(
            config.send_timeout,
            config.echo_tolerance,
            config.late_echo_window,
        );
        let hydrator = HistoryHydrator::new(config.operator_id.clone());

        Self {
            env,
            config,
            connection,
            store: ConversationStore::new(),
            presence: PresenceTracker::new(),
            hydrator,
            outbound,
            aggregator: ListAggregator::new(),
            correlation_prefix,
        }
    }

    /// Conversation store.
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Online counterparts.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Number of sends still tracked for reconciliation.
    pub fn outstanding_sends(&self) -> usize {
        self.outbound.len()
    }

    /// Number of history requests in flight.
    pub fn outstanding_history(&self) -> usize {
        self.hydrator.outstanding()
    }

    /// Process an event and return resulting actions.
    ///
    /// All store mutations caused by the event are reported in at most one
    /// trailing [`ClientAction::StoreChanged`].
    ///
    /// # Errors
    ///
    /// - `ClientError::Validation` for an empty conversation id or body
    /// - `ClientError::Connection` for `Connect` while a session is active
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let mut actions = match event {
            ClientEvent::Connect { credential } => self.handle_connect(credential)?,
            ClientEvent::Close => self.handle_close(),
            ClientEvent::TransportOpened => {
                self.connection.transport_opened(self.env.now());
                Vec::new()
            },
            ClientEvent::TransportClosed { reason } => self.handle_transport_closed(&reason),
            ClientEvent::TextReceived(text) => self.handle_text(&text),
            ClientEvent::Tick { now } => self.handle_tick(now),
            ClientEvent::SelectConversation(id) => self.handle_select(id)?,
            ClientEvent::SendMessage { conversation_id, body } => {
                self.handle_send(conversation_id, body)?.1
            },
            ClientEvent::RefreshConversations => {
                let mut actions = Vec::new();
                if self.connection.state() == ConnectionState::Connected {
                    self.request_lists(&mut actions);
                }
                actions
            },
        };

        self.flush_changes(&mut actions);
        Ok(actions)
    }

    /// Send a message and return its local id with the resulting actions.
    ///
    /// The message is appended as `Pending` immediately. While disconnected it
    /// is queued and goes out on the next successful connect.
    ///
    /// # Errors
    ///
    /// - `ClientError::Validation` for an empty conversation id or a blank
    ///   body
    pub fn send(
        &mut self,
        conversation_id: ConversationId,
        body: String,
    ) -> Result<(LocalId, Vec<ClientAction>), ClientError> {
        let (local_id, mut actions) = self.handle_send(conversation_id, body)?;
        self.flush_changes(&mut actions);
        Ok((local_id, actions))
    }

    fn handle_connect(&mut self, credential: String) -> Result<Vec<ClientAction>, ClientError> {
        let connection_actions = self.connection.connect(credential, self.env.now())?;
        let mut actions = Vec::new();
        self.apply_connection(connection_actions, &mut actions);
        Ok(actions)
    }

    fn handle_close(&mut self) -> Vec<ClientAction> {
        let connection_actions = self.connection.close();
        let mut actions = Vec::new();
        self.apply_connection(connection_actions, &mut actions);
        if self.presence.clear() {
            self.store.changes_mut().presence = true;
        }
        actions
    }

    fn handle_transport_closed(&mut self, reason: &str) -> Vec<ClientAction> {
        let connection_actions =
            self.connection.transport_closed(reason, &self.env, self.env.now());
        let mut actions = Vec::new();
        self.apply_connection(connection_actions, &mut actions);
        actions
    }

    fn handle_text(&mut self, text: &str) -> Vec<ClientAction> {
        let mut actions = Vec::new();
        match self.connection.handle_text(text, &self.env, self.env.now()) {
            Ok(connection_actions) => self.apply_connection(connection_actions, &mut actions),
            Err(err @ ConnectionError::UnexpectedPacket { .. }) => {
                debug!(%err, "ignoring packet");
            },
            Err(err) => {
                warn!(%err, "dropping malformed frame");
            },
        }
        actions
    }

    fn handle_tick(&mut self, now: E::Instant) -> Vec<ClientAction> {
        let mut actions = Vec::new();
        let connection_actions = self.connection.tick(&self.env, now);
        self.apply_connection(connection_actions, &mut actions);

        for (local_id, conversation_id) in self.outbound.expire(now) {
            if self.store.mark_failed(local_id) {
                warn!(%local_id, conversation = %conversation_id, "send not confirmed in time");
                actions.push(ClientAction::Notice(Notice::SendFailed(ClientError::SendTimeout {
                    local_id,
                    conversation_id,
                })));
            }
        }
        actions
    }

    fn handle_select(&mut self, id: ConversationId) -> Result<Vec<ClientAction>, ClientError> {
        if id.as_str().is_empty() {
            return Err(ClientError::validation("conversation id is empty"));
        }

        self.store.select(&id);

        let mut actions = Vec::new();
        if self.connection.state() == ConnectionState::Connected {
            self.request_history(&id, &mut actions);
        }
        Ok(actions)
    }

    fn handle_send(
        &mut self,
        conversation_id: ConversationId,
        body: String,
    ) -> Result<(LocalId, Vec<ClientAction>), ClientError> {
        if conversation_id.as_str().is_empty() {
            return Err(ClientError::validation("conversation id is empty"));
        }
        if body.trim().is_empty() {
            return Err(ClientError::validation("message body is empty"));
        }

        let local_id = self.store.allocate_local_id();
        let message = Message {
            local_id,
            server_id: None,
            conversation_id,
            role: Role::Operator,
            body,
            created_at: self.env.wall_clock_millis(),
            state: DeliveryState::Pending,
            sequence: 0,
        };

        let connected = self.connection.state() == ConnectionState::Connected;
        let correlation = format!("{}-{}", self.correlation_prefix, local_id.0);
        let payload = self.outbound.register(&message, correlation, self.env.now(), connected);
        self.store.append(message);

        let mut actions = Vec::new();
        if let Some(payload) = payload {
            self.push_command(Command::SendMessage(payload), &mut actions);
        }
        Ok((local_id, actions))
    }

    /// Translate connection actions into client actions.
    fn apply_connection(
        &mut self,
        connection_actions: Vec<ConnectionAction>,
        actions: &mut Vec<ClientAction>,
    ) {
        for action in connection_actions {
            match action {
                ConnectionAction::OpenTransport => actions.push(ClientAction::OpenTransport),
                ConnectionAction::CloseTransport => actions.push(ClientAction::CloseTransport),
                ConnectionAction::Send(packet) => match packet.encode() {
                    Ok(text) => actions.push(ClientAction::SendText(text)),
                    Err(err) => error!(%err, "failed to encode packet"),
                },
                ConnectionAction::StateChanged(state) => {
                    self.store.changes_mut().connection = true;
                    if !matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
                        self.hydrator.reset();
                    }
                },
                ConnectionAction::Established { resync } => self.on_established(resync, actions),
                ConnectionAction::Inbound(event) => self.route(event, actions),
                ConnectionAction::Retrying { attempt, delay, error } => {
                    actions.push(ClientAction::Notice(Notice::Reconnecting {
                        attempt,
                        delay,
                        reason: error.to_string(),
                    }));
                },
                ConnectionAction::Failed(err) => {
                    actions.push(ClientAction::Notice(Notice::ConnectionFailed(err.into())));
                },
            }
        }
    }

    /// Fetch everything that may have changed while we were away.
    fn on_established(&mut self, resync: bool, actions: &mut Vec<ClientAction>) {
        info!(resync, queued = self.outbound.queued(), "session ready");
        self.request_lists(actions);

        // Queued sends go first so the refetched history already holds them
        for payload in self.outbound.take_queued() {
            self.push_command(Command::SendMessage(payload), actions);
        }

        if let Some(selected) = self.store.selected().cloned() {
            self.request_history(&selected, actions);
        }
    }

    fn route(&mut self, event: ServerEvent, actions: &mut Vec<ClientAction>) {
        match event {
            ServerEvent::OnlineUsers(ids) => {
                if self.presence.replace(ids) {
                    self.store.changes_mut().presence = true;
                }
            },
            ServerEvent::ChatHistory(history) => self.apply_history(history),
            ServerEvent::ReceiveMessage(message) => self.apply_live(message),
            ServerEvent::ChatList(entries) | ServerEvent::ChatListUpdated(Some(entries)) => {
                self.aggregator.apply_snapshot(&mut self.store, entries);
            },
            ServerEvent::ChatListUpdated(None) => self.request_lists(actions),
            ServerEvent::ErrorResponse(response) => {
                warn!(message = %response.message, "server reported an error");
                actions.push(ClientAction::Notice(Notice::ServerError {
                    message: response.message,
                }));
            },
        }
    }

    fn apply_live(&mut self, wire: WireMessage) {
        let (conversation_id, role) = self.locate(&wire);
        if conversation_id.as_str().is_empty() {
            warn!("dropping message without a conversation");
            return;
        }

        let server_id = wire.id.clone().map(ServerId);
        if let Some(server_id) = &server_id
            && self.store.thread(&conversation_id).is_some_and(|t| t.contains_server_id(server_id))
        {
            debug!(conversation = %conversation_id, "duplicate message");
            return;
        }

        let echoed_at = wire.time_millis();

        if role == Role::Operator
            && let Some(reconciled) = self.outbound.reconcile(
                &conversation_id,
                &wire.message,
                echoed_at,
                wire.client_message_id.as_deref(),
                self.env.now(),
            )
        {
            debug!(
                local_id = %reconciled.local_id,
                was_failed = reconciled.was_failed,
                "send confirmed"
            );
            self.store.resolve(reconciled.local_id, server_id);
            return;
        }

        let local_id = self.store.allocate_local_id();
        self.store.append(Message {
            local_id,
            server_id,
            conversation_id,
            role,
            body: wire.message,
            created_at: echoed_at.unwrap_or_else(|| self.env.wall_clock_millis()),
            state: DeliveryState::Sent,
            sequence: 0,
        });
    }

    fn apply_history(&mut self, history: ChatHistory) {
        let named = match history.user_id.filter(|tag| !tag.is_empty()) {
            Some(tag) => Some(tag),
            None => self.common_conversation(&history.messages),
        };
        let Some((conversation_id, watermark)) = self.hydrator.attribute(named.as_deref()) else {
            return;
        };

        let now = self.env.now();
        let mut seen = HashSet::new();
        let mut messages = Vec::with_capacity(history.messages.len());

        for wire in history.messages {
            let (entry_conversation, role) = self.locate(&wire);
            if entry_conversation != conversation_id {
                debug!(conversation = %conversation_id, "skipping foreign history entry");
                continue;
            }

            let server_id = wire.id.clone().map(ServerId);
            if let Some(server_id) = &server_id
                && !seen.insert(server_id.clone())
            {
                continue;
            }

            let created_at = wire.time_millis();

            // A message we already hold keeps its identity across hydrations
            let known = server_id.as_ref().and_then(|server_id| {
                self.store.thread(&conversation_id).and_then(|t| t.local_id_of(server_id))
            });

            // Only entries new to the thread may confirm a pending send
            let adopted = if known.is_none() && role == Role::Operator {
                self.outbound
                    .reconcile(
                        &conversation_id,
                        &wire.message,
                        created_at,
                        wire.client_message_id.as_deref(),
                        now,
                    )
                    .map(|reconciled| reconciled.local_id)
            } else {
                None
            };

            messages.push(Message {
                local_id: known.or(adopted).unwrap_or_else(|| self.store.allocate_local_id()),
                server_id,
                conversation_id: conversation_id.clone(),
                role,
                body: wire.message,
                created_at: created_at.unwrap_or(0),
                state: DeliveryState::Sent,
                sequence: 0,
            });
        }

        debug!(conversation = %conversation_id, entries = messages.len(), "applying history");
        match watermark {
            Some(watermark) => self.store.replace_history(&conversation_id, messages, watermark),
            None => self.store.merge_history(&conversation_id, messages),
        }
    }

    /// The conversation every entry of an untagged history belongs to.
    fn common_conversation(&self, entries: &[WireMessage]) -> Option<String> {
        let operator_id = self.config.operator_id.as_deref();
        let mut ids = entries.iter().map(|wire| wire.conversation_id(operator_id));
        let first = ids.next()?;
        if ids.all(|id| id == first) {
            Some(first.to_string())
        } else {
            warn!("untagged history spans several conversations");
            None
        }
    }

    /// Conversation and author side of a wire message.
    fn locate(&self, wire: &WireMessage) -> (ConversationId, Role) {
        let operator_id = self.config.operator_id.as_deref();
        let role =
            if wire.is_from_operator(operator_id) { Role::Operator } else { Role::Counterpart };
        (ConversationId::new(wire.conversation_id(operator_id)), role)
    }

    fn request_lists(&mut self, actions: &mut Vec<ClientAction>) {
        self.push_command(Command::RequestPresence, actions);
        let request = ChatListRequest { admin_id: self.config.operator_id.clone() };
        self.push_command(Command::RequestChatList(request), actions);
    }

    fn request_history(&mut self, id: &ConversationId, actions: &mut Vec<ClientAction>) {
        let command = self.hydrator.request(id, self.store.sequence());
        self.push_command(command, actions);
    }

    fn push_command(&self, command: Command, actions: &mut Vec<ClientAction>) {
        let event = command.event();
        match command.into_packet().and_then(|packet| packet.encode()) {
            Ok(text) => actions.push(ClientAction::SendText(text)),
            Err(err) => error!(%err, ?event, "failed to encode command"),
        }
    }

    fn flush_changes(&mut self, actions: &mut Vec<ClientAction>) {
        let changes = self.store.take_changes();
        if !changes.is_empty() {
            actions.push(ClientAction::StoreChanged(changes));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future::Future,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    };

    use super::*;

    /// Manual clock: instants are durations since start, wall clock is
    /// 1 000 000 ms plus that.
    #[derive(Clone, Default)]
    struct TestEnv {
        millis: Arc<AtomicU64>,
    }

    impl TestEnv {
        fn advance(&self, by: Duration) -> Duration {
            self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
            self.now()
        }
    }

    impl Environment for TestEnv {
        type Instant = Duration;

        fn now(&self) -> Duration {
            Duration::from_millis(self.millis.load(Ordering::SeqCst))
        }

        fn sleep(&self, _duration: Duration) -> impl Future<Output = ()> + Send {
            std::future::ready(())
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(7);
        }

        fn wall_clock_millis(&self) -> u64 {
            1_000_000 + self.millis.load(Ordering::SeqCst)
        }
    }

    fn texts(actions: &[ClientAction]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                ClientAction::SendText(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn connected() -> (Client<TestEnv>, TestEnv) {
        connected_with(ClientConfig::default())
    }

    fn connected_with(config: ClientConfig) -> (Client<TestEnv>, TestEnv) {
        let env = TestEnv::default();
        let mut client = Client::new(env.clone(), config);
        client.handle(ClientEvent::Connect { credential: "tok".into() }).unwrap();
        client.handle(ClientEvent::TransportOpened).unwrap();
        client
            .handle(ClientEvent::TextReceived(
                r#"0{"sid":"s","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#.into(),
            ))
            .unwrap();
        client.handle(ClientEvent::TextReceived(r#"40{"sid":"n"}"#.into())).unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        (client, env)
    }

    fn receive(client: &mut Client<TestEnv>, payload: &str) -> Vec<ClientAction> {
        client
            .handle(ClientEvent::TextReceived(format!(r#"42["receive_message",{payload}]"#)))
            .unwrap()
    }

    fn history(client: &mut Client<TestEnv>, payload: &str) {
        client
            .handle(ClientEvent::TextReceived(format!(r#"42["chat_history",{payload}]"#)))
            .unwrap();
    }

    fn bodies(client: &Client<TestEnv>, id: &str) -> Vec<(String, DeliveryState)> {
        client
            .store()
            .thread(&ConversationId::from(id))
            .map(|t| t.messages.iter().map(|m| (m.body.clone(), m.state)).collect())
            .unwrap_or_default()
    }

    #[test]
    fn established_requests_presence_and_list() {
        let env = TestEnv::default();
        let mut client = Client::new(env, ClientConfig::default());
        client.handle(ClientEvent::Connect { credential: "tok".into() }).unwrap();
        client
            .handle(ClientEvent::TextReceived(
                r#"0{"sid":"s","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#.into(),
            ))
            .unwrap();
        let actions = client.handle(ClientEvent::TextReceived("40".into())).unwrap();

        assert_eq!(texts(&actions), vec![
            r#"42["get_online_users"]"#.to_string(),
            r#"42["admin_get_chats",{}]"#.to_string(),
        ]);
        assert!(actions.iter().any(|a| matches!(a, ClientAction::StoreChanged(c) if c.connection)));
    }

    #[test]
    fn send_is_optimistic_and_reconciled_by_echo() {
        let (mut client, _env) = connected();
        let c1 = ConversationId::from("c1");

        let (local_id, actions) = client.send(c1.clone(), "hello".into()).unwrap();
        assert_eq!(texts(&actions).len(), 1);
        assert_eq!(client.store().message(local_id).unwrap().state, DeliveryState::Pending);

        receive(
            &mut client,
            r#"{"_id":"m1","senderId":"op","receiverId":"c1","senderRole":"admin","message":"hello"}"#,
        );

        let thread = client.store().thread(&c1).unwrap();
        assert_eq!(thread.messages.len(), 1);
        assert_eq!(thread.messages[0].state, DeliveryState::Sent);
        assert_eq!(thread.messages[0].server_id, Some(ServerId("m1".into())));
        assert_eq!(client.outstanding_sends(), 0);
    }

    #[test]
    fn duplicate_server_id_is_ignored() {
        let (mut client, _env) = connected();
        let payload =
            r#"{"_id":"m1","senderId":"c1","receiverId":"op","senderRole":"user","message":"hi"}"#;

        receive(&mut client, payload);
        let actions = receive(&mut client, payload);

        assert_eq!(client.store().thread(&ConversationId::from("c1")).unwrap().messages.len(), 1);
        assert!(actions.is_empty());
    }

    #[test]
    fn send_timeout_marks_failed_and_notifies() {
        let (mut client, env) = connected();
        let (local_id, _) = client.send(ConversationId::from("c1"), "hi".into()).unwrap();

        // Keep the connection alive while time passes
        client.handle(ClientEvent::TextReceived("2".into())).unwrap();
        let now = env.advance(Duration::from_secs(16));
        client.handle(ClientEvent::TextReceived("2".into())).unwrap();
        let actions = client.handle(ClientEvent::Tick { now }).unwrap();

        assert_eq!(client.store().message(local_id).unwrap().state, DeliveryState::Failed);
        assert!(actions.iter().any(|a| a.failed_send() == Some(local_id)));
    }

    #[test]
    fn sends_while_disconnected_are_queued() {
        let env = TestEnv::default();
        let mut client = Client::new(env, ClientConfig::default());

        let (_, actions) = client.send(ConversationId::from("c1"), "later".into()).unwrap();
        assert!(texts(&actions).is_empty());

        client.handle(ClientEvent::Connect { credential: "tok".into() }).unwrap();
        client
            .handle(ClientEvent::TextReceived(
                r#"0{"sid":"s","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#.into(),
            ))
            .unwrap();
        let actions = client.handle(ClientEvent::TextReceived("40".into())).unwrap();

        assert!(texts(&actions).iter().any(|t| t.contains("later")));
    }

    #[test]
    fn blank_body_is_rejected() {
        let (mut client, _env) = connected();
        let err = client.send(ConversationId::from("c1"), "   ".into()).unwrap_err();
        assert!(matches!(err, ClientError::Validation { .. }));
        assert!(client.store().thread(&ConversationId::from("c1")).is_none());
    }

    #[test]
    fn send_frame_carries_session_scoped_correlation_id() {
        let (mut client, _env) = connected();
        let (_, actions) = client.send(ConversationId::from("c1"), "hello".into()).unwrap();

        insta::assert_snapshot!(texts(&actions).join("\n"), @r#"42["send_message",{"receiverId":"c1","message":"hello","clientMessageId":"0707070707070707-1"}]"#);
    }

    #[test]
    fn confirmed_send_keeps_local_id_through_hydration() {
        let (mut client, _env) = connected();
        let c1 = ConversationId::from("c1");

        let (local_id, _) = client.send(c1.clone(), "hello".into()).unwrap();
        receive(
            &mut client,
            r#"{"_id":"m1","senderId":"op","receiverId":"c1","senderRole":"admin","message":"hello"}"#,
        );

        client.handle(ClientEvent::SelectConversation(c1.clone())).unwrap();
        client
            .handle(ClientEvent::TextReceived(
                r#"42["chat_history",{"userId":"c1","messages":[{"_id":"m1","senderId":"op","receiverId":"c1","senderRole":"admin","message":"hello"}]}]"#
                    .into(),
            ))
            .unwrap();

        let thread = client.store().thread(&c1).unwrap();
        assert_eq!(thread.messages.len(), 1);
        assert_eq!(thread.messages[0].local_id, local_id);
    }

    #[test]
    fn known_history_entry_does_not_confirm_a_later_identical_send() {
        let (mut client, env) = connected();
        let c1 = ConversationId::from("c1");
        client.handle(ClientEvent::SelectConversation(c1.clone())).unwrap();
        history(&mut client, r#"{"userId":"c1","messages":[]}"#);

        let (first, _) = client.send(c1.clone(), "ok".into()).unwrap();
        receive(
            &mut client,
            r#"{"_id":"s1","senderId":"op","receiverId":"c1","senderRole":"admin","message":"ok"}"#,
        );
        // Same text again; its echo never comes
        let (second, _) = client.send(c1.clone(), "ok".into()).unwrap();

        client.handle(ClientEvent::SelectConversation(c1.clone())).unwrap();
        history(
            &mut client,
            r#"{"userId":"c1","messages":[{"_id":"s1","senderId":"op","receiverId":"c1","senderRole":"admin","message":"ok"}]}"#,
        );

        let thread = client.store().thread(&c1).unwrap();
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.local_id_of(&ServerId("s1".into())), Some(first));
        let pending = client.store().message(second).unwrap();
        assert_eq!(pending.state, DeliveryState::Pending);
        assert_eq!(pending.server_id, None);
        assert_eq!(client.outstanding_sends(), 1);

        client.handle(ClientEvent::TextReceived("2".into())).unwrap();
        let now = env.advance(Duration::from_secs(16));
        client.handle(ClientEvent::TextReceived("2".into())).unwrap();
        client.handle(ClientEvent::Tick { now }).unwrap();
        assert_eq!(client.store().message(second).unwrap().state, DeliveryState::Failed);
    }

    #[test]
    fn untagged_history_is_attributed_by_its_entries() {
        let (mut client, _env) = connected();
        let a1 = r#"{"_id":"a1","senderId":"a","receiverId":"op","senderRole":"user","message":"from a"}"#;
        let b1 = r#"{"_id":"b1","senderId":"b","receiverId":"op","senderRole":"user","message":"from b"}"#;
        let b2 = r#"{"_id":"b2","senderId":"b","receiverId":"op","senderRole":"user","message":"again b"}"#;

        client.handle(ClientEvent::SelectConversation("a".into())).unwrap();
        history(&mut client, &format!("[{a1}]"));

        client.handle(ClientEvent::SelectConversation("b".into())).unwrap();
        client.handle(ClientEvent::SelectConversation("a".into())).unwrap();
        client.handle(ClientEvent::SelectConversation("b".into())).unwrap();

        history(&mut client, &format!("[{b1}]"));
        // The request for a is answered with an error instead
        client
            .handle(ClientEvent::TextReceived(r#"42["errorResponse","lookup failed"]"#.into()))
            .unwrap();
        history(&mut client, &format!("[{b1},{b2}]"));

        assert_eq!(bodies(&client, "a"), vec![("from a".to_string(), DeliveryState::Sent)]);
        assert_eq!(bodies(&client, "b"), vec![
            ("from b".to_string(), DeliveryState::Sent),
            ("again b".to_string(), DeliveryState::Sent),
        ]);
        assert_eq!(client.outstanding_history(), 1);
    }

    #[test]
    fn empty_untagged_history_removes_nothing() {
        let (mut client, _env) = connected();
        client.handle(ClientEvent::SelectConversation("a".into())).unwrap();
        history(
            &mut client,
            r#"[{"_id":"a1","senderId":"a","receiverId":"op","senderRole":"user","message":"from a"}]"#,
        );

        client.handle(ClientEvent::SelectConversation("a".into())).unwrap();
        history(&mut client, "[]");

        assert_eq!(bodies(&client, "a"), vec![("from a".to_string(), DeliveryState::Sent)]);
        assert_eq!(client.outstanding_history(), 0);
    }

    #[test]
    fn unlabelled_messages_are_routed_by_operator_id() {
        let config = ClientConfig { operator_id: Some("op".into()), ..ClientConfig::default() };
        let (mut client, _env) = connected_with(config);

        receive(
            &mut client,
            r#"{"_id":"m1","senderId":"u1","receiverId":"op","message":"hello","createdAt":"2024-05-01T10:00:00.000Z"}"#,
        );
        let (local_id, _) = client.send(ConversationId::from("u1"), "hi".into()).unwrap();
        receive(&mut client, r#"{"_id":"m2","senderId":"op","receiverId":"u1","message":"hi"}"#);

        let thread = client.store().thread(&ConversationId::from("u1")).unwrap();
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.messages[0].role, Role::Counterpart);
        assert_eq!(thread.messages[0].created_at, 1_714_557_600_000);
        assert_eq!(client.store().message(local_id).unwrap().state, DeliveryState::Sent);
        assert!(client.store().thread(&ConversationId::from("op")).is_none());
    }

    #[test]
    fn unlabelled_message_without_operator_id_is_the_counterparts() {
        let (mut client, _env) = connected();
        receive(&mut client, r#"{"_id":"m1","senderId":"u1","receiverId":"op","message":"hello"}"#);

        let thread = client.store().thread(&ConversationId::from("u1")).unwrap();
        assert_eq!(thread.messages[0].role, Role::Counterpart);
        assert_eq!(client.store().summary(&ConversationId::from("u1")).unwrap().unread_count, 1);
    }

    #[test]
    fn select_requests_history_and_clears_unread() {
        let (mut client, _env) = connected();
        receive(
            &mut client,
            r#"{"_id":"m1","senderId":"c1","receiverId":"op","senderRole":"user","message":"hi"}"#,
        );
        let c1 = ConversationId::from("c1");
        assert_eq!(client.store().summary(&c1).unwrap().unread_count, 1);

        let actions = client.handle(ClientEvent::SelectConversation(c1.clone())).unwrap();

        assert_eq!(texts(&actions), vec![r#"42["get_chat_history",{"userId":"c1"}]"#.to_string()]);
        assert_eq!(client.store().summary(&c1).unwrap().unread_count, 0);
        assert_eq!(client.outstanding_history(), 1);
    }

    #[test]
    fn server_error_becomes_notice() {
        let (mut client, _env) = connected();
        let actions = client
            .handle(ClientEvent::TextReceived(r#"42["errorResponse","nope"]"#.into()))
            .unwrap();

        assert_eq!(actions, vec![ClientAction::Notice(Notice::ServerError {
            message: "nope".into()
        })]);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let (mut client, _env) = connected();
        let actions = client.handle(ClientEvent::TextReceived("42[oops".into())).unwrap();
        assert!(actions.is_empty());
        assert_eq!(client.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn connect_twice_is_an_error() {
        let (mut client, _env) = connected();
        let err = client.handle(ClientEvent::Connect { credential: "tok".into() }).unwrap_err();
        assert!(matches!(err, ClientError::Connection(ConnectionError::InvalidState { .. })));
    }
}
