//! Runtime errors.

use parley_client::ClientError;
use thiserror::Error;

/// Errors returned through a [`SessionHandle`](crate::SessionHandle).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The client rejected the request.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The runtime has stopped; the session is gone.
    #[error("session runtime stopped")]
    Stopped,
}

impl RuntimeError {
    /// Returns true if retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Client(err) => err.is_transient(),
            Self::Stopped => false,
        }
    }
}
