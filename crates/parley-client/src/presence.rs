//! Online counterpart tracking.

use std::collections::BTreeSet;

use crate::types::ConversationId;

/// Set of counterparts the server reports as online.
///
/// Every `online_users` event is a full snapshot; there are no incremental
/// updates to merge.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    online: BTreeSet<ConversationId>,
}

impl PresenceTracker {
    /// Empty tracker: nobody online until the first snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the online set. Returns whether it changed.
    pub fn replace<I, S>(&mut self, ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next: BTreeSet<ConversationId> = ids
            .into_iter()
            .map(ConversationId::new)
            .filter(|id| !id.as_str().is_empty())
            .collect();

        if next == self.online {
            return false;
        }
        self.online = next;
        true
    }

    /// Whether a counterpart is online.
    pub fn is_online(&self, id: &ConversationId) -> bool {
        self.online.contains(id)
    }

    /// Online counterparts in id order.
    pub fn online(&self) -> impl Iterator<Item = &ConversationId> {
        self.online.iter()
    }

    /// Number of online counterparts.
    pub fn len(&self) -> usize {
        self.online.len()
    }

    /// Nobody online.
    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    /// Forget everything (session closed).
    pub fn clear(&mut self) -> bool {
        let changed = !self.online.is_empty();
        self.online.clear();
        changed
    }
}
