//! Conversation list snapshots.

use std::collections::HashSet;

use parley_proto::ChatListEntry;
use tracing::debug;

use crate::{
    store::ConversationStore,
    types::{ConversationId, Counterpart},
};

/// Merges `chat_list` snapshots into the store's summaries.
///
/// Display data (name, email) always comes from the snapshot. Preview,
/// timestamp and unread count are last-writer-wins on the message timestamp:
/// a snapshot older than what the store already shows does not roll it back.
/// Summaries absent from the snapshot are dropped unless a local thread
/// exists for them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListAggregator;

impl ListAggregator {
    /// Create an aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one full-list snapshot.
    pub fn apply_snapshot(&self, store: &mut ConversationStore, entries: Vec<ChatListEntry>) {
        let selected = store.selected().cloned();
        let mut seen = HashSet::with_capacity(entries.len());

        for entry in entries {
            let id = ConversationId::new(entry.user.id.as_str());
            if id.as_str().is_empty() {
                debug!(row = %entry.id, "skipping list row without user id");
                continue;
            }

            let entry_at = entry.last_message_at.as_ref().and_then(|t| t.to_millis().ok());
            let summary = store.summary_entry(&id);

            summary.counterpart = Counterpart {
                display_name: Some(entry.user.display_name()),
                email: entry.user.email.clone(),
            };

            let newer = match (entry_at, summary.last_message_at) {
                (Some(remote), Some(local)) => remote >= local,
                (_, None) => true,
                (None, Some(_)) => false,
            };
            if newer {
                summary.last_message_preview = entry.last_message;
                summary.last_message_at = entry_at.or(summary.last_message_at);
                summary.unread_count = entry.unread_count;
            }
            if selected.as_ref() == Some(&id) {
                summary.unread_count = 0;
            }

            seen.insert(id);
        }

        store.retain_summaries(|id| seen.contains(id));
        debug!(conversations = seen.len(), "applied conversation list");
    }
}
