//! Conversation store.
//!
//! Single source of truth for threads, summaries and the selection. Every
//! other component mutates it; the UI only reads it.
//!
//! Mutations record what they touched in a [`ChangeSet`]. The client drains
//! it once per handled event so subscribers see one notification per logical
//! change, however many individual mutations that change needed.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::types::{
    ConversationId, ConversationSummary, ConversationThread, DeliveryState, LocalId, Message,
    Role, ServerId,
};

/// What changed since the last [`ConversationStore::take_changes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Threads whose messages changed.
    pub threads: BTreeSet<ConversationId>,
    /// Any summary changed (preview, unread, display data, membership).
    pub summaries: bool,
    /// Presence set changed.
    pub presence: bool,
    /// Selected conversation changed.
    pub selection: bool,
    /// Connection state changed.
    pub connection: bool,
}

impl ChangeSet {
    /// Nothing changed.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
            && !self.summaries
            && !self.presence
            && !self.selection
            && !self.connection
    }
}

/// Aggregate counters over all summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Number of conversations with a summary.
    pub conversations: usize,
    /// Sum of unread counts.
    pub unread: u64,
}

/// Conversation store.
#[derive(Debug, Default)]
pub struct ConversationStore {
    threads: HashMap<ConversationId, ConversationThread>,
    summaries: HashMap<ConversationId, ConversationSummary>,
    /// Watermark of the newest history applied, per thread.
    hydrated_at: HashMap<ConversationId, u64>,
    /// Messages that came from a history rather than a live push.
    from_history: HashSet<LocalId>,
    /// Which thread holds each local id.
    locations: HashMap<LocalId, ConversationId>,
    selected: Option<ConversationId>,
    last_sequence: u64,
    last_local_id: u64,
    changes: ChangeSet,
}

impl ConversationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently selected conversation.
    pub fn selected(&self) -> Option<&ConversationId> {
        self.selected.as_ref()
    }

    /// Thread for a conversation. `None` until first referenced.
    pub fn thread(&self, id: &ConversationId) -> Option<&ConversationThread> {
        self.threads.get(id)
    }

    /// Every thread, in no particular order.
    pub fn threads(&self) -> impl Iterator<Item = &ConversationThread> {
        self.threads.values()
    }

    /// Summary for a conversation.
    pub fn summary(&self, id: &ConversationId) -> Option<&ConversationSummary> {
        self.summaries.get(id)
    }

    /// Message by local id.
    pub fn message(&self, local_id: LocalId) -> Option<&Message> {
        let id = self.locations.get(&local_id)?;
        self.threads.get(id)?.message(local_id)
    }

    /// All summaries, most recent activity first, ties broken by id.
    pub fn summaries(&self) -> Vec<&ConversationSummary> {
        let mut summaries: Vec<_> = self.summaries.values().collect();
        summaries.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.conversation_id.cmp(&b.conversation_id))
        });
        summaries
    }

    /// Summaries whose display name, email, id or preview contains `query`
    /// (case-insensitive). An empty query matches everything.
    pub fn search(&self, query: &str) -> Vec<&ConversationSummary> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.summaries();
        }

        self.summaries().into_iter().filter(|s| s.matches(&query)).collect()
    }

    /// Conversation and unread totals.
    pub fn stats(&self) -> Stats {
        Stats {
            conversations: self.summaries.len(),
            unread: self.summaries.values().map(|s| u64::from(s.unread_count)).sum(),
        }
    }

    /// Highest arrival sequence assigned so far.
    ///
    /// Recorded when a history request is issued; anything appended later is
    /// newer than that response can know about.
    pub fn sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Reserve a fresh local id.
    pub fn allocate_local_id(&mut self) -> LocalId {
        self.last_local_id += 1;
        LocalId(self.last_local_id)
    }

    /// Create thread and summary for `id` if missing.
    pub fn ensure(&mut self, id: &ConversationId) {
        if !self.threads.contains_key(id) {
            self.threads.insert(id.clone(), ConversationThread::new(id.clone()));
            self.changes.threads.insert(id.clone());
        }
        if !self.summaries.contains_key(id) {
            self.summaries.insert(id.clone(), ConversationSummary::new(id.clone()));
            self.changes.summaries = true;
        }
    }

    /// Append a message to the end of its thread.
    ///
    /// Never reorders: the message goes last even if its timestamp is older.
    /// Counterpart messages bump the unread count unless their conversation is
    /// selected.
    pub fn append(&mut self, mut message: Message) -> LocalId {
        let id = message.conversation_id.clone();
        self.ensure(&id);

        message.sequence = self.next_sequence();
        let local_id = message.local_id;
        let counts_as_unread =
            message.role == Role::Counterpart && self.selected.as_ref() != Some(&id);

        self.touch_summary(&id, &message.body, message.created_at);
        if counts_as_unread && let Some(summary) = self.summaries.get_mut(&id) {
            summary.unread_count = summary.unread_count.saturating_add(1);
            self.changes.summaries = true;
        }

        self.locations.insert(local_id, id.clone());
        if let Some(thread) = self.threads.get_mut(&id) {
            thread.messages.push(message);
        }
        self.changes.threads.insert(id);
        local_id
    }

    /// Replace a thread with a server history.
    ///
    /// The history comes first, in server order. After it, in their previous
    /// order, the store keeps:
    ///
    /// - local messages the server has not acknowledged yet (unless a history
    ///   entry adopted their local id)
    /// - live messages that arrived after `watermark` and are not part of
    ///   this history
    ///
    /// A history answering an older request than one already applied is
    /// stale: it refreshes the entries it carries and drops nothing.
    pub fn replace_history(&mut self, id: &ConversationId, history: Vec<Message>, watermark: u64) {
        self.install_history(id, history, Some(watermark));
    }

    /// Merge a history that answers no known request.
    ///
    /// The entries are installed as by [`Self::replace_history`], but every
    /// message they do not carry is kept.
    pub fn merge_history(&mut self, id: &ConversationId, history: Vec<Message>) {
        self.install_history(id, history, None);
    }

    fn install_history(
        &mut self,
        id: &ConversationId,
        history: Vec<Message>,
        watermark: Option<u64>,
    ) {
        self.ensure(id);

        let previous_watermark = self.hydrated_at.get(id).copied();
        let stale = match watermark {
            Some(watermark) => previous_watermark.is_some_and(|at| watermark < at),
            None => true,
        };
        let history_server_ids: HashSet<ServerId> =
            history.iter().filter_map(|m| m.server_id.clone()).collect();
        let adopted: HashSet<LocalId> = history.iter().map(|m| m.local_id).collect();

        let mut messages = Vec::with_capacity(history.len());
        let mut newest: Option<(u64, String)> = None;
        for mut message in history {
            message.sequence = self.next_sequence();
            message.conversation_id = id.clone();
            if newest.as_ref().is_none_or(|(at, _)| message.created_at >= *at) {
                newest = Some((message.created_at, message.body.clone()));
            }
            self.locations.insert(message.local_id, id.clone());
            self.from_history.insert(message.local_id);
            messages.push(message);
        }
        if let Some(watermark) = watermark {
            let hydrated_at = previous_watermark.map_or(watermark, |at| at.max(watermark));
            self.hydrated_at.insert(id.clone(), hydrated_at);
        }

        let previous = self
            .threads
            .get_mut(id)
            .map(|thread| std::mem::take(&mut thread.messages))
            .unwrap_or_default();

        for message in previous {
            if adopted.contains(&message.local_id) {
                continue;
            }

            let not_in_history =
                message.server_id.as_ref().is_none_or(|s| !history_server_ids.contains(s));
            let live_since_request = watermark.is_some_and(|w| message.sequence > w)
                && !self.from_history.contains(&message.local_id);

            if message.is_unreconciled() || (not_in_history && (stale || live_since_request)) {
                messages.push(message);
            } else {
                self.locations.remove(&message.local_id);
                self.from_history.remove(&message.local_id);
            }
        }

        if let Some((at, body)) = newest {
            self.touch_summary(id, &body, at);
        }
        if let Some(thread) = self.threads.get_mut(id) {
            thread.messages = messages;
        }
        self.changes.threads.insert(id.clone());
    }

    /// Confirm a local message: `Pending`/`Failed` become `Sent`.
    ///
    /// The server id is only recorded if none is set. Returns whether anything
    /// changed.
    pub fn resolve(&mut self, local_id: LocalId, server_id: Option<ServerId>) -> bool {
        let Some(message) = self.message_mut(local_id) else {
            return false;
        };
        if message.state == DeliveryState::Sent {
            return false;
        }

        message.state = DeliveryState::Sent;
        if message.server_id.is_none() {
            message.server_id = server_id;
        }
        let id = message.conversation_id.clone();
        self.changes.threads.insert(id);
        true
    }

    /// Mark a pending message as failed. Returns whether anything changed.
    pub fn mark_failed(&mut self, local_id: LocalId) -> bool {
        let Some(message) = self.message_mut(local_id) else {
            return false;
        };
        if message.state != DeliveryState::Pending {
            return false;
        }

        message.state = DeliveryState::Failed;
        let id = message.conversation_id.clone();
        self.changes.threads.insert(id);
        true
    }

    /// Select a conversation and clear its unread count.
    pub fn select(&mut self, id: &ConversationId) {
        self.ensure(id);
        if self.selected.as_ref() != Some(id) {
            self.selected = Some(id.clone());
            self.changes.selection = true;
        }
        if let Some(summary) = self.summaries.get_mut(id)
            && summary.unread_count != 0
        {
            summary.unread_count = 0;
            self.changes.summaries = true;
        }
    }

    /// Drain accumulated changes.
    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    pub(crate) fn changes_mut(&mut self) -> &mut ChangeSet {
        &mut self.changes
    }

    /// Summary for `id`, created if missing (without a thread).
    pub(crate) fn summary_entry(&mut self, id: &ConversationId) -> &mut ConversationSummary {
        self.changes.summaries = true;
        self.summaries
            .entry(id.clone())
            .or_insert_with(|| ConversationSummary::new(id.clone()))
    }

    /// Drop summaries that fail `keep`. Summaries backed by a thread are
    /// always kept.
    pub(crate) fn retain_summaries(&mut self, keep: impl Fn(&ConversationId) -> bool) {
        let threads = &self.threads;
        let before = self.summaries.len();
        self.summaries.retain(|id, _| keep(id) || threads.contains_key(id));
        if self.summaries.len() != before {
            self.changes.summaries = true;
        }
    }

    fn message_mut(&mut self, local_id: LocalId) -> Option<&mut Message> {
        let id = self.locations.get(&local_id)?;
        self.threads.get_mut(id)?.messages.iter_mut().find(|m| m.local_id == local_id)
    }

    fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }

    /// Move the preview forward if `at` is not older than what is shown.
    fn touch_summary(&mut self, id: &ConversationId, body: &str, at: u64) {
        let Some(summary) = self.summaries.get_mut(id) else {
            return;
        };
        if summary.last_message_at.is_none_or(|current| at >= current) {
            summary.last_message_at = Some(at);
            summary.last_message_preview = Some(body.to_string());
            self.changes.summaries = true;
        }
    }
}
