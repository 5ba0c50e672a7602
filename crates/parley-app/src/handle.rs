//! Collaborator interface for the operator UI.
//!
//! The UI never touches the client directly. It reads [`SessionView`]
//! snapshots and issues the two intents it is allowed (select and send), plus
//! session lifecycle, through a [`SessionHandle`]. Every request is a message
//! to the runtime task, so all mutation stays on that one loop.

use parley_client::{ClientError, ConversationId, LocalId, Notice};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::{error::RuntimeError, view::SessionView};

/// Request from a handle to the runtime.
#[derive(Debug)]
pub(crate) enum Request {
    Connect {
        credential: String,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Select {
        conversation_id: ConversationId,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Send {
        conversation_id: ConversationId,
        body: String,
        reply: oneshot::Sender<Result<LocalId, ClientError>>,
    },
    Refresh,
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running session.
///
/// Dropping every handle stops the runtime.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<Request>,
    view: watch::Receiver<SessionView>,
    notices: broadcast::Sender<Notice>,
}

impl SessionHandle {
    pub(crate) fn new(
        requests: mpsc::Sender<Request>,
        view: watch::Receiver<SessionView>,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        Self { requests, view, notices }
    }

    /// Start the session with an opaque bearer credential.
    ///
    /// Returns once the connect has started; progress shows up in the view's
    /// connection state and as notices.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Client` if a session is already active
    /// - `RuntimeError::Stopped` if the runtime is gone
    pub async fn connect(&self, credential: impl Into<String>) -> Result<(), RuntimeError> {
        let credential = credential.into();
        Ok(self.call(|reply| Request::Connect { credential, reply }).await??)
    }

    /// Select a conversation: clears its unread count and loads its history.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Client` for an empty id
    /// - `RuntimeError::Stopped` if the runtime is gone
    pub async fn select(&self, conversation_id: impl Into<ConversationId>) -> Result<(), RuntimeError> {
        let conversation_id = conversation_id.into();
        Ok(self.call(|reply| Request::Select { conversation_id, reply }).await??)
    }

    /// Send a message. Returns its local id; the message is already in the
    /// thread as `Pending` when this returns.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Client` for an empty id or blank body
    /// - `RuntimeError::Stopped` if the runtime is gone
    pub async fn send(
        &self,
        conversation_id: impl Into<ConversationId>,
        body: impl Into<String>,
    ) -> Result<LocalId, RuntimeError> {
        let conversation_id = conversation_id.into();
        let body = body.into();
        Ok(self.call(|reply| Request::Send { conversation_id, body, reply }).await??)
    }

    /// Ask the server for fresh presence and conversation list.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the runtime is gone
    pub async fn refresh(&self) -> Result<(), RuntimeError> {
        self.requests.send(Request::Refresh).await.map_err(|_| RuntimeError::Stopped)
    }

    /// End the session. Idempotent.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Stopped` if the runtime is gone
    pub async fn close(&self) -> Result<(), RuntimeError> {
        self.call(|reply| Request::Close { reply }).await
    }

    /// Latest view.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Watch the view for changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Receive operator notices (connection failures, failed sends, server
    /// errors) from now on.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.requests.send(request(reply)).await.map_err(|_| RuntimeError::Stopped)?;
        response.await.map_err(|_| RuntimeError::Stopped)
    }
}
