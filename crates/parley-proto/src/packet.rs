//! Engine.IO / Socket.IO text framing.
//!
//! Every WebSocket text message is one Engine.IO packet: a single type digit
//! followed by an optional body. Type `4` (message) wraps a Socket.IO packet,
//! which again starts with a type digit, optionally a namespace and an ack id,
//! then JSON.
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,"pingTimeout":20000}   open
//! 2 / 3                                                    ping / pong
//! 40{"token":"Bearer .."}                                  connect (client)
//! 40{"sid":".."}                                           connect ack (server)
//! 44{"message":"unauthorized"}                             connect error
//! 42["receive_message",{..}]                               event
//! ```
//!
//! Only the default namespace is used. Namespaces and ack ids on inbound
//! packets are skipped, binary attachments are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// Engine.IO open handshake sent by the server when the transport opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Engine.IO session id.
    pub sid: String,
    /// Transport upgrades offered (unused over a raw WebSocket).
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Server ping interval in milliseconds.
    pub ping_interval: u64,
    /// Grace period after a ping before the server drops us, in milliseconds.
    pub ping_timeout: u64,
}

/// Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Transport opened (server to client).
    Open(Handshake),
    /// Transport close request.
    Close,
    /// Heartbeat ping (server to client in protocol v4).
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Socket.IO packet.
    Message(SocketPacket),
    /// Upgrade/noop packets, ignored over a plain WebSocket.
    Noop,
}

/// Socket.IO packet carried inside [`Packet::Message`].
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Namespace connect. The client sends its auth object, the server
    /// acknowledges with `{"sid": ..}`.
    Connect(Option<Value>),
    /// Namespace disconnect.
    Disconnect,
    /// Named event with JSON arguments.
    Event {
        /// Event name (first element of the JSON array).
        name: String,
        /// Remaining array elements.
        args: Vec<Value>,
    },
    /// Server refused the namespace connection (bad credential).
    ConnectError {
        /// Server supplied reason.
        message: String,
    },
}

impl Packet {
    /// Socket.IO connect packet carrying the bearer credential.
    pub fn connect(credential: &str) -> Self {
        let auth = serde_json::json!({ "token": format!("Bearer {credential}") });
        Self::Message(SocketPacket::Connect(Some(auth)))
    }

    /// Socket.IO event packet.
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Message(SocketPacket::Event { name: name.into(), args })
    }

    /// Encode to WebSocket text.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if a body fails to serialize
    pub fn encode(&self) -> Result<String> {
        match self {
            Self::Open(handshake) => {
                let body = serde_json::to_string(handshake)
                    .map_err(|e| ProtocolError::json("open handshake", &e))?;
                Ok(format!("0{body}"))
            },
            Self::Close => Ok("1".to_string()),
            Self::Ping => Ok("2".to_string()),
            Self::Pong => Ok("3".to_string()),
            Self::Message(inner) => Ok(format!("4{}", inner.encode()?)),
            Self::Noop => Ok("6".to_string()),
        }
    }

    /// Decode WebSocket text.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Empty` for empty text
    /// - `ProtocolError::UnknownEngineType` for unknown type digits
    /// - Any error from [`SocketPacket::decode`] for message packets
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => serde_json::from_str(rest)
                .map(Self::Open)
                .map_err(|e| ProtocolError::json("open handshake", &e)),
            '1' => Ok(Self::Close),
            // "2probe" is an upgrade probe; treated as a plain ping
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => SocketPacket::decode(rest).map(Self::Message),
            '5' | '6' => Ok(Self::Noop),
            other => Err(ProtocolError::UnknownEngineType(other)),
        }
    }
}

impl SocketPacket {
    /// Encode without the Engine.IO prefix.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Json` if a body fails to serialize
    pub fn encode(&self) -> Result<String> {
        match self {
            Self::Connect(None) => Ok("0".to_string()),
            Self::Connect(Some(auth)) => {
                let body = serde_json::to_string(auth)
                    .map_err(|e| ProtocolError::json("connect auth", &e))?;
                Ok(format!("0{body}"))
            },
            Self::Disconnect => Ok("1".to_string()),
            Self::Event { name, args } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                let body = serde_json::to_string(&array)
                    .map_err(|e| ProtocolError::json("event", &e))?;
                Ok(format!("2{body}"))
            },
            Self::ConnectError { message } => {
                let body = serde_json::to_string(&serde_json::json!({ "message": message }))
                    .map_err(|e| ProtocolError::json("connect error", &e))?;
                Ok(format!("4{body}"))
            },
        }
    }

    /// Decode a Socket.IO packet (without the Engine.IO prefix).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Empty` for empty text
    /// - `ProtocolError::UnknownSocketType` for acks and binary packets
    /// - `ProtocolError::Json` for malformed bodies
    /// - `ProtocolError::MissingEventName` for events without a name
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let body = skip_ack_id(skip_namespace(chars.as_str()));

        match kind {
            '0' if body.is_empty() => Ok(Self::Connect(None)),
            '0' => serde_json::from_str(body)
                .map(|value| Self::Connect(Some(value)))
                .map_err(|e| ProtocolError::json("connect", &e)),
            '1' => Ok(Self::Disconnect),
            '2' => {
                let mut array: Vec<Value> =
                    serde_json::from_str(body).map_err(|e| ProtocolError::json("event", &e))?;
                if array.is_empty() {
                    return Err(ProtocolError::MissingEventName);
                }
                let Value::String(name) = array.remove(0) else {
                    return Err(ProtocolError::MissingEventName);
                };
                Ok(Self::Event { name, args: array })
            },
            '4' => {
                let value: Value = serde_json::from_str(body)
                    .map_err(|e| ProtocolError::json("connect error", &e))?;
                let message = match &value {
                    Value::String(s) => s.clone(),
                    Value::Object(map) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .map_or_else(|| value.to_string(), str::to_string),
                    other => other.to_string(),
                };
                Ok(Self::ConnectError { message })
            },
            other => Err(ProtocolError::UnknownSocketType(other)),
        }
    }
}

/// Skip a `/namespace,` prefix.
fn skip_namespace(text: &str) -> &str {
    if !text.starts_with('/') {
        return text;
    }
    match text.find(',') {
        Some(idx) => &text[idx + 1..],
        None => "",
    }
}

/// Skip a numeric ack id.
fn skip_ack_id(text: &str) -> &str {
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    &text[digits..]
}
