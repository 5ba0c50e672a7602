//! Client events and actions.

use std::time::Duration;

use crate::{
    error::ClientError,
    store::ChangeSet,
    types::{ConversationId, LocalId},
};

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Moving text between the transport and the client
/// - Reporting transport open and close
/// - Driving time forward via ticks
/// - Forwarding operator intents (select, send)
///
/// Generic over `I` (Instant type) to support both production
/// (`std::time::Instant`) and simulation (virtual) clocks.
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// Start a session with this bearer credential.
    Connect {
        /// Opaque credential, forwarded to the server as-is.
        credential: String,
    },

    /// End the session.
    Close,

    /// Transport is up.
    TransportOpened,

    /// Transport failed to open or dropped.
    TransportClosed {
        /// Driver supplied reason.
        reason: String,
    },

    /// Text frame from the transport.
    TextReceived(String),

    /// Time tick for timeouts and reconnects.
    Tick {
        /// Current time from the environment.
        now: I,
    },

    /// Operator opened a conversation.
    SelectConversation(ConversationId),

    /// Operator sent a message.
    SendMessage {
        /// Target conversation.
        conversation_id: ConversationId,
        /// Message body.
        body: String,
    },

    /// Ask the server for a fresh conversation list and presence.
    RefreshConversations,
}

/// Out-of-band information for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The session ended with an error.
    ConnectionFailed(ClientError),

    /// The connection dropped; a retry is scheduled.
    Reconnecting {
        /// Retry number (1 based).
        attempt: u32,
        /// Delay before the retry.
        delay: Duration,
        /// Why the attempt failed.
        reason: String,
    },

    /// A send was not confirmed in time.
    SendFailed(ClientError),

    /// The server reported a request-level error.
    ServerError {
        /// Server supplied message.
        message: String,
    },
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Open the transport.
    OpenTransport,

    /// Close the transport.
    CloseTransport,

    /// Send this text frame.
    SendText(String),

    /// The store changed. One per handled event at most.
    StoreChanged(ChangeSet),

    /// Tell the operator something.
    Notice(Notice),
}

impl ClientAction {
    /// Local id of a failed send, if this is a send-failure notice.
    pub fn failed_send(&self) -> Option<LocalId> {
        match self {
            Self::Notice(Notice::SendFailed(ClientError::SendTimeout { local_id, .. })) => {
                Some(*local_id)
            },
            _ => None,
        }
    }
}
