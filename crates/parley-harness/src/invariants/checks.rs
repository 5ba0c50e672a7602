//! Standard invariant checks.

use std::collections::HashSet;

use parley_client::DeliveryState;

use super::{Invariant, InvariantResult, SessionSnapshot, Violation};

/// The selected conversation has a thread and a summary.
pub struct SelectionExists;

impl Invariant for SelectionExists {
    fn name(&self) -> &'static str {
        "selection_exists"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let Some(selected) = &state.selected else {
            return Ok(());
        };
        if state.threads.contains_key(selected) && state.unread.contains_key(selected) {
            return Ok(());
        }
        Err(Violation {
            invariant: self.name(),
            message: format!("selected conversation {selected} has no thread or summary"),
        })
    }
}

/// The selected conversation never shows unread messages.
pub struct SelectedIsRead;

impl Invariant for SelectedIsRead {
    fn name(&self) -> &'static str {
        "selected_is_read"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let Some(selected) = &state.selected else {
            return Ok(());
        };
        match state.unread.get(selected) {
            Some(count) if *count > 0 => Err(Violation {
                invariant: self.name(),
                message: format!("selected conversation {selected} has {count} unread"),
            }),
            _ => Ok(()),
        }
    }
}

/// Every thread has a summary.
pub struct ThreadsHaveSummaries;

impl Invariant for ThreadsHaveSummaries {
    fn name(&self) -> &'static str {
        "threads_have_summaries"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        match state.threads.keys().find(|id| !state.unread.contains_key(*id)) {
            Some(id) => Err(Violation {
                invariant: self.name(),
                message: format!("thread {id} has no summary"),
            }),
            None => Ok(()),
        }
    }
}

/// A pending message has not been acknowledged, so it carries no server id.
pub struct PendingIsUnacknowledged;

impl Invariant for PendingIsUnacknowledged {
    fn name(&self) -> &'static str {
        "pending_is_unacknowledged"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        for (id, messages) in &state.threads {
            if let Some(m) = messages
                .iter()
                .find(|m| m.state == DeliveryState::Pending && m.server_id.is_some())
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("thread {id}: pending {} has server id {:?}", m.local_id, m.server_id),
                });
            }
        }
        Ok(())
    }
}

/// A server message appears at most once per thread.
pub struct NoDuplicateServerIds;

impl Invariant for NoDuplicateServerIds {
    fn name(&self) -> &'static str {
        "no_duplicate_server_ids"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        for (id, messages) in &state.threads {
            let mut seen = HashSet::new();
            for server_id in messages.iter().filter_map(|m| m.server_id.as_ref()) {
                if !seen.insert(server_id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("thread {id}: server id {} appears twice", server_id.0),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Local ids are unique across the whole store.
pub struct UniqueLocalIds;

impl Invariant for UniqueLocalIds {
    fn name(&self) -> &'static str {
        "unique_local_ids"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let mut seen = HashSet::new();
        for (id, messages) in &state.threads {
            for m in messages {
                if !seen.insert(m.local_id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("{} appears twice (seen again in thread {id})", m.local_id),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parley_client::{LocalId, ServerId};

    use super::*;
    use crate::invariants::MessageSnapshot;

    fn message(local: u64, server: Option<&str>, state: DeliveryState, sequence: u64) -> MessageSnapshot {
        MessageSnapshot {
            local_id: LocalId(local),
            server_id: server.map(|s| ServerId(s.into())),
            state,
            sequence,
        }
    }

    fn with_thread(messages: Vec<MessageSnapshot>) -> SessionSnapshot {
        let mut state = SessionSnapshot::empty();
        state.unread.insert("c1".into(), 0);
        state.threads.insert("c1".into(), messages);
        state
    }

    #[test]
    fn selected_with_unread_is_violation() {
        let mut state = with_thread(vec![]);
        state.selected = Some("c1".into());
        state.unread.insert("c1".into(), 2);

        assert!(SelectedIsRead.check(&state).is_err());
    }

    #[test]
    fn selection_without_thread_is_violation() {
        let mut state = SessionSnapshot::empty();
        state.selected = Some("c9".into());

        assert!(SelectionExists.check(&state).is_err());
    }

    #[test]
    fn thread_without_summary_is_violation() {
        let mut state = with_thread(vec![]);
        state.unread.clear();

        assert!(ThreadsHaveSummaries.check(&state).is_err());
    }

    #[test]
    fn pending_with_server_id_is_violation() {
        let state = with_thread(vec![message(1, Some("m1"), DeliveryState::Pending, 1)]);
        assert!(PendingIsUnacknowledged.check(&state).is_err());
    }

    #[test]
    fn duplicate_server_id_is_violation() {
        let state = with_thread(vec![
            message(1, Some("m1"), DeliveryState::Sent, 1),
            message(2, Some("m1"), DeliveryState::Sent, 2),
        ]);
        assert!(NoDuplicateServerIds.check(&state).is_err());
    }

    #[test]
    fn duplicate_local_id_is_violation() {
        let state = with_thread(vec![
            message(1, None, DeliveryState::Pending, 1),
            message(1, None, DeliveryState::Pending, 2),
        ]);
        assert!(UniqueLocalIds.check(&state).is_err());
    }

    #[test]
    fn healthy_thread_passes() {
        let state = with_thread(vec![
            message(1, Some("m1"), DeliveryState::Sent, 1),
            message(2, None, DeliveryState::Pending, 2),
            message(3, None, DeliveryState::Failed, 3),
        ]);
        for invariant in [
            &PendingIsUnacknowledged as &dyn Invariant,
            &NoDuplicateServerIds,
            &UniqueLocalIds,
        ] {
            assert!(invariant.check(&state).is_ok(), "{}", invariant.name());
        }
    }
}
