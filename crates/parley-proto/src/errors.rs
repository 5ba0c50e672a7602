//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding wire packets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Packet text was empty.
    #[error("empty packet")]
    Empty,

    /// Unknown Engine.IO packet type character.
    #[error("unknown engine packet type {0:?}")]
    UnknownEngineType(char),

    /// Unknown Socket.IO packet type character.
    #[error("unknown socket packet type {0:?}")]
    UnknownSocketType(char),

    /// JSON body could not be parsed or produced.
    #[error("malformed JSON in {context}: {reason}")]
    Json {
        /// Which part of the packet was being processed.
        context: &'static str,
        /// Underlying serde_json message.
        reason: String,
    },

    /// Event packet did not start with a string event name.
    #[error("event packet has no name")]
    MissingEventName,

    /// Event name is not part of the chat protocol.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// Event arguments did not match the expected shape.
    #[error("invalid payload for {event}: {reason}")]
    InvalidPayload {
        /// Event whose payload was rejected.
        event: &'static str,
        /// Why the payload was rejected.
        reason: String,
    },

    /// Timestamp could not be interpreted.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

impl ProtocolError {
    pub(crate) fn json(context: &'static str, err: &serde_json::Error) -> Self {
        Self::Json { context, reason: err.to_string() }
    }
}
