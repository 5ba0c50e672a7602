//! Conversation data model.

use std::fmt;

/// Opaque id of a one-to-one thread between the operator and one counterpart.
///
/// The server keys conversations by the counterpart's user id, so this is that
/// id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap a counterpart id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Client-assigned message id, unique within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// Server-assigned message id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(pub String);

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The console operator (us).
    Operator,
    /// The end-user on the other side.
    Counterpart,
}

/// Delivery state of a message.
///
/// `Pending -> Sent` and `Pending -> Failed` are the only transitions, plus
/// `Failed -> Sent` when a late echo proves the server did get it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    /// Sent optimistically, no server confirmation yet.
    Pending,
    /// Confirmed by the server.
    Sent,
    /// Not confirmed within the send timeout. Never retried automatically.
    Failed,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Client id. Stable for the life of the session.
    pub local_id: LocalId,
    /// Server id. Always `None` while `Pending`; immutable once set.
    pub server_id: Option<ServerId>,
    /// Thread this message belongs to.
    pub conversation_id: ConversationId,
    /// Author.
    pub role: Role,
    /// Text.
    pub body: String,
    /// Unix milliseconds: client clock for local sends, server clock otherwise.
    pub created_at: u64,
    /// Delivery state.
    pub state: DeliveryState,
    /// Store-assigned arrival order. Strictly increasing across the session.
    pub sequence: u64,
}

impl Message {
    /// Whether the server has not yet acknowledged this message.
    pub fn is_unreconciled(&self) -> bool {
        self.server_id.is_none() && self.state != DeliveryState::Sent
    }
}

/// Counterpart display data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counterpart {
    /// Display name ("First Last"). `None` until a list snapshot provides it.
    pub display_name: Option<String>,
    /// Contact email.
    pub email: Option<String>,
}

/// Per-conversation summary shown in the conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    /// Conversation.
    pub conversation_id: ConversationId,
    /// Display data.
    pub counterpart: Counterpart,
    /// Body of the latest message.
    pub last_message_preview: Option<String>,
    /// Time of the latest message (Unix milliseconds).
    pub last_message_at: Option<u64>,
    /// Counterpart messages the operator has not seen.
    pub unread_count: u32,
}

impl ConversationSummary {
    pub(crate) fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            counterpart: Counterpart::default(),
            last_message_preview: None,
            last_message_at: None,
            unread_count: 0,
        }
    }

    /// Name to show: display name if known, else the id.
    pub fn title(&self) -> &str {
        self.counterpart.display_name.as_deref().unwrap_or(self.conversation_id.as_str())
    }

    /// Whether id, display name, email or preview contains `query`, which
    /// must already be lowercase.
    pub fn matches(&self, query: &str) -> bool {
        let contains =
            |field: Option<&str>| field.is_some_and(|value| value.to_lowercase().contains(query));

        contains(Some(self.conversation_id.as_str()))
            || contains(self.counterpart.display_name.as_deref())
            || contains(self.counterpart.email.as_deref())
            || contains(self.last_message_preview.as_deref())
    }
}

/// Chronological, append-only message list for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationThread {
    /// Conversation.
    pub conversation_id: ConversationId,
    /// Messages in display order.
    pub messages: Vec<Message>,
}

impl ConversationThread {
    pub(crate) fn new(conversation_id: ConversationId) -> Self {
        Self { conversation_id, messages: Vec::new() }
    }

    /// Message by local id.
    pub fn message(&self, local_id: LocalId) -> Option<&Message> {
        self.messages.iter().find(|m| m.local_id == local_id)
    }

    /// Whether a message with this server id is already present.
    pub fn contains_server_id(&self, server_id: &ServerId) -> bool {
        self.messages.iter().any(|m| m.server_id.as_ref() == Some(server_id))
    }

    /// Local id of the message carrying this server id.
    pub fn local_id_of(&self, server_id: &ServerId) -> Option<LocalId> {
        self.messages.iter().find(|m| m.server_id.as_ref() == Some(server_id)).map(|m| m.local_id)
    }
}
