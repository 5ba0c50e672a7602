//! Error types for the Parley connection core.
//!
//! One enum covers handshake, timeout, rejection and transport failures.
//! [`ConnectionError::is_transient`] drives the reconnect decision and
//! [`ConnectionError::is_authentication`] marks the one failure that must never
//! be retried.

use std::{io, time::Duration};

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors that can occur during connection state machine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Invalid state transition attempted
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Received a packet that makes no sense in the current state
    #[error("unexpected {packet} packet in state {state:?}")]
    UnexpectedPacket {
        /// Current state when the packet arrived
        state: ConnectionState,
        /// Kind of packet
        packet: &'static str,
    },

    /// Server refused the credential
    #[error("authentication rejected: {message}")]
    Rejected {
        /// Server supplied reason
        message: String,
    },

    /// Handshake did not complete within timeout
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// No inbound traffic within the idle timeout
    #[error("idle timeout after {elapsed:?}")]
    IdleTimeout {
        /// How long connection was idle
        elapsed: Duration,
    },

    /// Transport failed to open or dropped
    #[error("transport error: {0}")]
    Transport(String),

    /// Reconnection gave up
    #[error("connection lost after {attempts} reconnect attempts: {last}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Failure that ended the last attempt
        last: String,
    },

    /// Protocol error from packet parsing
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ConnectionError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Rejections and protocol violations are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. } | Self::IdleTimeout { .. } | Self::Transport(_)
        )
    }

    /// Returns true if the server rejected the credential.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Convert `ConnectionError` to `io::Error` for async I/O boundaries.
impl From<ConnectionError> for io::Error {
    fn from(err: ConnectionError) -> Self {
        let kind = match &err {
            ConnectionError::HandshakeTimeout { .. } | ConnectionError::IdleTimeout { .. } => {
                io::ErrorKind::TimedOut
            },
            ConnectionError::Rejected { .. } => io::ErrorKind::PermissionDenied,
            ConnectionError::InvalidState { .. }
            | ConnectionError::UnexpectedPacket { .. }
            | ConnectionError::Protocol(_) => io::ErrorKind::InvalidData,
            ConnectionError::Transport(_) | ConnectionError::RetriesExhausted { .. } => {
                io::ErrorKind::ConnectionAborted
            },
        };
        Self::new(kind, err.to_string())
    }
}

impl From<parley_proto::ProtocolError> for ConnectionError {
    fn from(err: parley_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_transport_are_transient() {
        assert!(
            ConnectionError::HandshakeTimeout { elapsed: Duration::from_secs(11) }.is_transient()
        );
        assert!(ConnectionError::IdleTimeout { elapsed: Duration::from_secs(46) }.is_transient());
        assert!(ConnectionError::Transport("reset by peer".to_string()).is_transient());
    }

    #[test]
    fn rejection_is_fatal() {
        let err = ConnectionError::Rejected { message: "jwt expired".to_string() };
        assert!(!err.is_transient());
        assert!(err.is_authentication());
        assert_eq!(io::Error::from(err).kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn protocol_violations_are_fatal() {
        assert!(
            !ConnectionError::InvalidState {
                state: ConnectionState::Connected,
                operation: "connect",
            }
            .is_transient()
        );
        assert!(!ConnectionError::Protocol("bad json".to_string()).is_transient());
        assert!(
            !ConnectionError::RetriesExhausted { attempts: 8, last: "refused".to_string() }
                .is_transient()
        );
    }
}
