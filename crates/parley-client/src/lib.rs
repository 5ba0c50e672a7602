//! Client
//!
//! Action-based conversation sync state machine for the Parley operator
//! console. One [`Client`] is one session: it owns the connection, the
//! conversation store and every component that mutates it.
//!
//! # Architecture
//!
//! The client follows the same sans-IO pattern as [`parley_core`]. It receives
//! events ([`ClientEvent`]), routes them through pure state machine logic, and
//! returns actions ([`ClientAction`]) for the caller to execute. All mutation
//! happens inside [`Client::handle`], so a single cooperative loop is enough:
//! no locks, and every store change is atomic with respect to that loop.
//!
//! # Components
//!
//! - [`ConversationStore`]: threads and summaries, the only state the UI reads
//! - [`PresenceTracker`]: online counterpart set
//! - [`HistoryHydrator`]: history requests and attribution of responses
//! - [`OutboundCoordinator`]: optimistic sends, echo reconciliation, timeouts
//! - [`ListAggregator`]: merges server list snapshots into summaries

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod aggregator;
mod client;
mod config;
mod error;
mod event;
mod hydrator;
mod outbound;
mod presence;
mod store;
mod types;

pub use aggregator::ListAggregator;
pub use client::Client;
pub use config::ClientConfig;
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent, Notice};
pub use hydrator::HistoryHydrator;
pub use outbound::{OutboundCoordinator, Reconciled};
pub use parley_core::{ConnectionState, Environment};
pub use presence::PresenceTracker;
pub use store::{ChangeSet, ConversationStore, Stats};
pub use types::{
    ConversationId, ConversationSummary, ConversationThread, Counterpart, DeliveryState, LocalId,
    Message, Role, ServerId,
};
