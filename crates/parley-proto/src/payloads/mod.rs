//! Typed chat events.
//!
//! Socket.IO events are `[name, args...]` arrays. The event name identifies the
//! payload type, so each [`Command`] and [`ServerEvent`] variant maps to exactly
//! one [`EventName`] (enforced by match exhaustiveness), mirroring how the
//! server dispatches on names.
//!
//! Decoding is tolerant where the server is known to be loose (ids as numbers,
//! errors as bare strings, untagged history) and strict everywhere else:
//! unknown event names are rejected rather than silently ignored.

pub mod chat;
pub mod list;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

pub use self::{
    chat::{ChatHistory, HistoryRequest, SendMessage, WireMessage, WireRole, WireTime},
    list::{ChatListEntry, ChatListRequest, WireUser},
};
use crate::{
    Packet, SocketPacket,
    errors::{ProtocolError, Result},
};

/// Event names understood by the chat server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    /// Client asks for the online user list.
    GetOnlineUsers,
    /// Server pushes the online user list.
    OnlineUsers,
    /// Client asks for the conversation list.
    AdminGetChats,
    /// Server answers with the conversation list.
    ChatList,
    /// Server pushes a new list, or asks the client to refetch.
    UpdateChatList,
    /// Client asks for one conversation's history.
    GetChatHistory,
    /// Server answers with history.
    ChatHistory,
    /// Client sends a message.
    SendMessage,
    /// Server delivers a message (including echoes of our own).
    ReceiveMessage,
    /// Server reports a request-level error.
    ErrorResponse,
}

impl EventName {
    /// Name as it appears on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetOnlineUsers => "get_online_users",
            Self::OnlineUsers => "online_users",
            Self::AdminGetChats => "admin_get_chats",
            Self::ChatList => "chat_list",
            Self::UpdateChatList => "update_chat_list",
            Self::GetChatHistory => "get_chat_history",
            Self::ChatHistory => "chat_history",
            Self::SendMessage => "send_message",
            Self::ReceiveMessage => "receive_message",
            Self::ErrorResponse => "errorResponse",
        }
    }

    /// Parse a wire name. `None` for names outside the protocol.
    pub fn parse(name: &str) -> Option<Self> {
        let event = match name {
            "get_online_users" => Self::GetOnlineUsers,
            "online_users" => Self::OnlineUsers,
            "admin_get_chats" => Self::AdminGetChats,
            "chat_list" => Self::ChatList,
            "update_chat_list" => Self::UpdateChatList,
            "get_chat_history" => Self::GetChatHistory,
            "chat_history" => Self::ChatHistory,
            "send_message" => Self::SendMessage,
            "receive_message" => Self::ReceiveMessage,
            "errorResponse" => Self::ErrorResponse,
            _ => return None,
        };
        Some(event)
    }
}

/// `errorResponse` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub message: String,
}

/// Client to server events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask for the online user set.
    RequestPresence,
    /// Ask for the full conversation list.
    RequestChatList(ChatListRequest),
    /// Ask for one conversation's history.
    RequestHistory(HistoryRequest),
    /// Send a message.
    SendMessage(SendMessage),
}

impl Command {
    /// Event name for this command.
    pub const fn event(&self) -> EventName {
        match self {
            Self::RequestPresence => EventName::GetOnlineUsers,
            Self::RequestChatList(_) => EventName::AdminGetChats,
            Self::RequestHistory(_) => EventName::GetChatHistory,
            Self::SendMessage(_) => EventName::SendMessage,
        }
    }

    /// Wrap into a Socket.IO event packet.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if the payload fails to serialize
    pub fn into_packet(self) -> Result<Packet> {
        let event = self.event();
        let args = match self {
            Self::RequestPresence => vec![],
            Self::RequestChatList(inner) => vec![to_value(event, &inner)?],
            Self::RequestHistory(inner) => vec![to_value(event, &inner)?],
            Self::SendMessage(inner) => vec![to_value(event, &inner)?],
        };
        Ok(Packet::event(event.as_str(), args))
    }

    /// Decode a command from event name and arguments (server side).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownEvent` if `name` is not a client event
    /// - `ProtocolError::InvalidPayload` if arguments do not match
    pub fn decode(name: &str, args: Vec<Value>) -> Result<Self> {
        let event = EventName::parse(name).ok_or_else(|| ProtocolError::UnknownEvent(name.into()))?;
        match event {
            EventName::GetOnlineUsers => Ok(Self::RequestPresence),
            EventName::AdminGetChats => {
                let request = optional_arg(event, args)?.unwrap_or_default();
                Ok(Self::RequestChatList(request))
            },
            EventName::GetChatHistory => Ok(Self::RequestHistory(required_arg(event, args)?)),
            EventName::SendMessage => Ok(Self::SendMessage(required_arg(event, args)?)),
            EventName::OnlineUsers
            | EventName::ChatList
            | EventName::UpdateChatList
            | EventName::ChatHistory
            | EventName::ReceiveMessage
            | EventName::ErrorResponse => Err(ProtocolError::UnknownEvent(name.into())),
        }
    }
}

/// Server to client events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Full set of online counterpart ids.
    OnlineUsers(Vec<String>),
    /// History for one conversation.
    ChatHistory(ChatHistory),
    /// A live message.
    ReceiveMessage(WireMessage),
    /// Full conversation list (answer to `admin_get_chats`).
    ChatList(Vec<ChatListEntry>),
    /// Pushed list update. `None` means "refetch": the server only signals that
    /// something changed.
    ChatListUpdated(Option<Vec<ChatListEntry>>),
    /// Request-level error.
    ErrorResponse(ErrorResponse),
}

impl ServerEvent {
    /// Event name for this event.
    pub const fn event(&self) -> EventName {
        match self {
            Self::OnlineUsers(_) => EventName::OnlineUsers,
            Self::ChatHistory(_) => EventName::ChatHistory,
            Self::ReceiveMessage(_) => EventName::ReceiveMessage,
            Self::ChatList(_) => EventName::ChatList,
            Self::ChatListUpdated(_) => EventName::UpdateChatList,
            Self::ErrorResponse(_) => EventName::ErrorResponse,
        }
    }

    /// Decode from a Socket.IO event.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownEvent` if `name` is not a server event
    /// - `ProtocolError::InvalidPayload` if arguments do not match
    pub fn decode(name: &str, args: Vec<Value>) -> Result<Self> {
        let event = EventName::parse(name).ok_or_else(|| ProtocolError::UnknownEvent(name.into()))?;
        match event {
            EventName::OnlineUsers => {
                let users: Vec<Value> = optional_arg(event, args)?.unwrap_or_default();
                Ok(Self::OnlineUsers(users.iter().filter_map(identity_of).collect()))
            },
            EventName::ChatHistory => {
                let history = optional_arg(event, args)?
                    .unwrap_or(ChatHistory { user_id: None, messages: vec![] });
                Ok(Self::ChatHistory(history))
            },
            EventName::ReceiveMessage => Ok(Self::ReceiveMessage(required_arg(event, args)?)),
            EventName::ChatList => {
                Ok(Self::ChatList(optional_arg(event, args)?.unwrap_or_default()))
            },
            EventName::UpdateChatList => Ok(Self::ChatListUpdated(optional_arg(event, args)?)),
            EventName::ErrorResponse => {
                let message = match args.into_iter().next() {
                    Some(Value::String(s)) => s,
                    Some(Value::Object(map)) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown server error")
                        .to_string(),
                    Some(other) => other.to_string(),
                    None => "unknown server error".to_string(),
                };
                Ok(Self::ErrorResponse(ErrorResponse { message }))
            },
            EventName::GetOnlineUsers
            | EventName::AdminGetChats
            | EventName::GetChatHistory
            | EventName::SendMessage => Err(ProtocolError::UnknownEvent(name.into())),
        }
    }

    /// Decode from a packet. `None` if the packet is not an event.
    ///
    /// # Errors
    ///
    /// - Any error from [`ServerEvent::decode`]
    pub fn from_packet(packet: Packet) -> Result<Option<Self>> {
        match packet {
            Packet::Message(SocketPacket::Event { name, args }) => {
                Self::decode(&name, args).map(Some)
            },
            _ => Ok(None),
        }
    }

    /// Wrap into a Socket.IO event packet.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if the payload fails to serialize
    pub fn into_packet(self) -> Result<Packet> {
        let event = self.event();
        let args = match self {
            Self::OnlineUsers(inner) => vec![to_value(event, &inner)?],
            Self::ChatHistory(inner) => vec![to_value(event, &inner)?],
            Self::ReceiveMessage(inner) => vec![to_value(event, &inner)?],
            Self::ChatList(inner) => vec![to_value(event, &inner)?],
            Self::ChatListUpdated(None) => vec![],
            Self::ChatListUpdated(Some(inner)) => vec![to_value(event, &inner)?],
            Self::ErrorResponse(inner) => vec![to_value(event, &inner)?],
        };
        Ok(Packet::event(event.as_str(), args))
    }
}

fn to_value<T: Serialize>(event: EventName, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ProtocolError::InvalidPayload {
        event: event.as_str(),
        reason: e.to_string(),
    })
}

/// First argument, `None` if absent or JSON null.
fn optional_arg<T: DeserializeOwned>(event: EventName, args: Vec<Value>) -> Result<Option<T>> {
    match args.into_iter().next() {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
            ProtocolError::InvalidPayload { event: event.as_str(), reason: e.to_string() }
        }),
    }
}

fn required_arg<T: DeserializeOwned>(event: EventName, args: Vec<Value>) -> Result<T> {
    optional_arg(event, args)?.ok_or_else(|| ProtocolError::InvalidPayload {
        event: event.as_str(),
        reason: "missing argument".to_string(),
    })
}

/// User id from a presence entry: a string, a number, or an object with
/// `_id`/`userId`.
fn identity_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("_id").or_else(|| map.get("userId")).and_then(identity_of),
        _ => None,
    }
}
