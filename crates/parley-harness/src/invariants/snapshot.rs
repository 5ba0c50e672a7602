//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what a session exposes at one point in time. Invariants
//! run against snapshots rather than live state so every check sees the same
//! consistent picture.

use std::collections::BTreeMap;

use parley_client::{Client, ConnectionState, DeliveryState, Environment, LocalId, ServerId};

/// One message as the invariants see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSnapshot {
    /// Local id.
    pub local_id: LocalId,
    /// Server id, once known.
    pub server_id: Option<ServerId>,
    /// Delivery state.
    pub state: DeliveryState,
    /// Store arrival sequence.
    pub sequence: u64,
}

/// Snapshot of one session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Connection state.
    pub connection: ConnectionState,
    /// Selected conversation.
    pub selected: Option<String>,
    /// Unread count per summary.
    pub unread: BTreeMap<String, u32>,
    /// Messages per thread, in display order.
    pub threads: BTreeMap<String, Vec<MessageSnapshot>>,
}

impl SessionSnapshot {
    /// Capture a client's observable state.
    pub fn capture<E: Environment>(client: &Client<E>) -> Self {
        let store = client.store();
        let unread = store
            .summaries()
            .into_iter()
            .map(|s| (s.conversation_id.as_str().to_string(), s.unread_count))
            .collect();
        let threads = store
            .threads()
            .map(|thread| {
                let messages = thread
                    .messages
                    .iter()
                    .map(|m| MessageSnapshot {
                        local_id: m.local_id,
                        server_id: m.server_id.clone(),
                        state: m.state,
                        sequence: m.sequence,
                    })
                    .collect();
                (thread.conversation_id.as_str().to_string(), messages)
            })
            .collect();

        Self {
            connection: client.connection_state(),
            selected: store.selected().map(|id| id.as_str().to_string()),
            unread,
            threads,
        }
    }

    /// Snapshot of a fresh, disconnected session.
    pub fn empty() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            selected: None,
            unread: BTreeMap::new(),
            threads: BTreeMap::new(),
        }
    }
}
