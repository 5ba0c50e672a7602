//! Client error types.
//!
//! Connection failures are folded into the three kinds a caller acts on:
//! the credential was refused, the network gave out, or the request itself
//! was bad. [`ClientError::SendTimeout`] is delivered as a notice, never as a
//! return value.

use parley_core::ConnectionError;
use thiserror::Error;

use crate::types::{ConversationId, LocalId};

/// Errors surfaced by the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Server refused the credential. Not retried.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Server supplied reason
        message: String,
    },

    /// Connection lost and could not be restored.
    #[error("network error: {reason}")]
    Network {
        /// What went wrong
        reason: String,
    },

    /// Caller supplied an invalid request.
    #[error("invalid request: {reason}")]
    Validation {
        /// What was wrong with it
        reason: String,
    },

    /// A send was not confirmed in time.
    #[error("message {local_id} to {conversation_id} was not confirmed")]
    SendTimeout {
        /// The send
        local_id: LocalId,
        /// Its conversation
        conversation_id: ConversationId,
    },

    /// Operation not valid in the current connection state.
    #[error(transparent)]
    Connection(ConnectionError),
}

impl ClientError {
    /// Returns true if the error may clear up without caller action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Connection(err) => err.is_transient(),
            Self::Authentication { .. } | Self::Validation { .. } | Self::SendTimeout { .. } => {
                false
            },
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }
}

impl From<ConnectionError> for ClientError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Rejected { message } => Self::Authentication { message },
            ConnectionError::RetriesExhausted { .. }
            | ConnectionError::Transport(_)
            | ConnectionError::HandshakeTimeout { .. }
            | ConnectionError::IdleTimeout { .. } => Self::Network { reason: err.to_string() },
            ConnectionError::InvalidState { .. }
            | ConnectionError::UnexpectedPacket { .. }
            | ConnectionError::Protocol(_) => Self::Connection(err),
        }
    }
}
