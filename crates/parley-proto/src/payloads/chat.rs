//! Chat message payloads: live messages, sends, and history.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Who authored a message, as the server labels it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    /// Console operator.
    #[serde(alias = "operator")]
    Admin,
    /// End-user on the other side of the conversation.
    #[serde(alias = "counterpart", alias = "customer")]
    User,
    /// Any role this client does not know. Treated as the counterpart.
    #[serde(other)]
    Other,
}

/// Server timestamp: either Unix milliseconds or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTime {
    /// Unix milliseconds.
    Millis(u64),
    /// RFC 3339 / ISO 8601 text, e.g. `2024-05-01T10:00:00.000Z`.
    Text(String),
}

impl WireTime {
    /// Unix milliseconds.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidTimestamp` if the text is not RFC 3339 or is
    ///   before the Unix epoch
    pub fn to_millis(&self) -> Result<u64> {
        match self {
            Self::Millis(ms) => Ok(*ms),
            Self::Text(text) => {
                let parsed = chrono::DateTime::parse_from_rfc3339(text)
                    .map_err(|e| ProtocolError::InvalidTimestamp(format!("{text}: {e}")))?;
                u64::try_from(parsed.timestamp_millis())
                    .map_err(|_| ProtocolError::InvalidTimestamp(text.clone()))
            },
        }
    }
}

/// A message as it travels on the wire (`receive_message`, history entries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Server-assigned id.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Author's user id.
    pub sender_id: String,
    /// Recipient's user id.
    pub receiver_id: String,
    /// Author's role, when the server labels it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_role: Option<WireRole>,
    /// Message body.
    pub message: String,
    /// Send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<WireTime>,
    /// Persist time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<WireTime>,
    /// Last update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<WireTime>,
    /// Correlation id echoed from [`SendMessage::client_message_id`], when the
    /// server supports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

impl WireMessage {
    /// Whether the operator wrote this message.
    ///
    /// `senderRole` decides when present. Otherwise the sender is compared
    /// with `operator_id`; with no operator id an unlabelled message is the
    /// counterpart's.
    pub fn is_from_operator(&self, operator_id: Option<&str>) -> bool {
        match self.sender_role {
            Some(role) => role == WireRole::Admin,
            None => operator_id.is_some_and(|id| id == self.sender_id),
        }
    }

    /// Counterpart id naming the conversation this message belongs to.
    ///
    /// Operator messages belong to their receiver's conversation, everything
    /// else to the sender's.
    pub fn conversation_id(&self, operator_id: Option<&str>) -> &str {
        if self.is_from_operator(operator_id) { &self.receiver_id } else { &self.sender_id }
    }

    /// Best available timestamp in Unix milliseconds.
    ///
    /// Prefers `timestamp`, then `createdAt`, then `updatedAt`. `None` if no
    /// field is present or parseable.
    pub fn time_millis(&self) -> Option<u64> {
        [&self.timestamp, &self.created_at, &self.updated_at]
            .into_iter()
            .flatten()
            .find_map(|t| t.to_millis().ok())
    }
}

/// `send_message` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Counterpart receiving the message.
    pub receiver_id: String,
    /// Message body.
    pub message: String,
    /// Client correlation id for echo reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

/// `get_chat_history` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    /// Counterpart whose conversation is requested.
    pub user_id: String,
    /// Operator id, if the deployment needs it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,
}

/// `chat_history` response.
///
/// Servers that tag responses send `{"userId": .., "messages": [..]}`; older
/// ones send a bare array. An untagged response has `user_id == None` and is
/// attributed by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HistoryShape", into = "HistoryShape")]
pub struct ChatHistory {
    /// Conversation the history belongs to, if the server said so.
    pub user_id: Option<String>,
    /// Messages in chronological order.
    pub messages: Vec<WireMessage>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum HistoryShape {
    Tagged {
        #[serde(rename = "userId", alias = "conversationId")]
        user_id: String,
        #[serde(default)]
        messages: Vec<WireMessage>,
    },
    Bare(Vec<WireMessage>),
}

impl From<HistoryShape> for ChatHistory {
    fn from(shape: HistoryShape) -> Self {
        match shape {
            HistoryShape::Tagged { user_id, messages } => Self { user_id: Some(user_id), messages },
            HistoryShape::Bare(messages) => Self { user_id: None, messages },
        }
    }
}

impl From<ChatHistory> for HistoryShape {
    fn from(history: ChatHistory) -> Self {
        match history.user_id {
            Some(user_id) => Self::Tagged { user_id, messages: history.messages },
            None => Self::Bare(history.messages),
        }
    }
}
