//! Core
//!
//! Transport-independent pieces of the Parley sync core:
//!
//! - [`env::Environment`]: time, randomness and wall clock, injected so the
//!   same logic runs under a virtual clock in simulation
//! - [`backoff::Backoff`]: capped, jittered exponential reconnect delays
//! - [`connection::Connection`]: the transport connection state machine
//!   (handshake, heartbeat, idle detection, reconnection)
//! - [`error::ConnectionError`]: everything the connection can report
//!
//! Like the rest of the workspace these are pure state machines. Methods take
//! the current time and return actions for a driver to execute.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod connection;
pub mod env;
pub mod error;

pub use backoff::{Backoff, BackoffConfig};
pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionState};
pub use env::Environment;
pub use error::ConnectionError;
