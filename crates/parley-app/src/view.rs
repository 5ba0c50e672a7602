//! Read model for the UI.
//!
//! [`SessionView`] is what the operator interface renders: summaries, the
//! selected thread, presence and connection state. The runtime publishes a
//! fresh view on a `watch` channel after every store change, rebuilding only
//! the parts the [`ChangeSet`] names.

use parley_client::{
    ChangeSet, Client, ConnectionState, ConversationId, ConversationSummary, Environment, Message,
    Stats,
};

/// Snapshot of the session as the UI sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// Connection state.
    pub connection: ConnectionState,
    /// Summaries, most recent activity first.
    pub summaries: Vec<ConversationSummary>,
    /// Selected conversation.
    pub selected: Option<ConversationId>,
    /// Messages of the selected conversation, in display order.
    pub thread: Vec<Message>,
    /// Online counterparts in id order.
    pub online: Vec<ConversationId>,
    /// Conversation and unread totals.
    pub stats: Stats,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            summaries: Vec::new(),
            selected: None,
            thread: Vec::new(),
            online: Vec::new(),
            stats: Stats::default(),
        }
    }
}

impl SessionView {
    /// Build a complete view.
    pub fn capture<E: Environment>(client: &Client<E>) -> Self {
        let mut view = Self::default();
        view.refresh_connection(client);
        view.refresh_summaries(client);
        view.refresh_thread(client);
        view.refresh_presence(client);
        view
    }

    /// Update the parts named in `changes`.
    pub fn apply<E: Environment>(&mut self, client: &Client<E>, changes: &ChangeSet) {
        if changes.connection {
            self.refresh_connection(client);
        }
        if changes.summaries {
            self.refresh_summaries(client);
        }
        let selected_touched = self.selected.as_ref().is_some_and(|id| changes.threads.contains(id));
        if changes.selection || selected_touched {
            self.refresh_thread(client);
        }
        if changes.presence {
            self.refresh_presence(client);
        }
    }

    /// Whether a counterpart is online.
    pub fn is_online(&self, id: &ConversationId) -> bool {
        self.online.binary_search(id).is_ok()
    }

    /// Summary for a conversation.
    pub fn summary(&self, id: &ConversationId) -> Option<&ConversationSummary> {
        self.summaries.iter().find(|s| &s.conversation_id == id)
    }

    /// Summaries matching `query` (case-insensitive), in display order.
    pub fn search(&self, query: &str) -> Vec<&ConversationSummary> {
        let query = query.trim().to_lowercase();
        self.summaries.iter().filter(|s| query.is_empty() || s.matches(&query)).collect()
    }

    fn refresh_connection<E: Environment>(&mut self, client: &Client<E>) {
        self.connection = client.connection_state();
    }

    fn refresh_summaries<E: Environment>(&mut self, client: &Client<E>) {
        let store = client.store();
        self.summaries = store.summaries().into_iter().cloned().collect();
        self.stats = store.stats();
    }

    fn refresh_thread<E: Environment>(&mut self, client: &Client<E>) {
        let store = client.store();
        self.selected = store.selected().cloned();
        self.thread = self
            .selected
            .as_ref()
            .and_then(|id| store.thread(id))
            .map(|thread| thread.messages.clone())
            .unwrap_or_default();
    }

    fn refresh_presence<E: Environment>(&mut self, client: &Client<E>) {
        self.online = client.presence().online().cloned().collect();
    }
}
