//! Deterministic simulation harness for Parley.
//!
//! Everything needed to run the operator sync core without a real server or a
//! real clock:
//!
//! - [`SimEnv`]: virtual clock and seeded RNG
//! - [`SimServer`]: scripted chat server speaking the Socket.IO wire format,
//!   with switches for every server quirk the client must tolerate
//! - [`SimSession`]: client and server in lockstep, frames delivered when the
//!   test says so
//! - [`SimDriver`]: [`parley_app::Driver`] backed by a `SimServer`, for
//!   driving the real async runtime
//! - [`SimTransport`]: driver over turmoil TCP for network-level scenarios
//!
//! # Invariant Testing
//!
//! The `invariants` module checks what must hold after every step, not
//! specific scenarios. [`SimSession`] runs [`InvariantRegistry::standard()`]
//! after each step and panics with context on the first violation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod session;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_server;
pub mod sim_transport;

pub use invariants::{
    Invariant, InvariantRegistry, InvariantResult, MessageSnapshot, SessionSnapshot, Violation,
};
pub use session::SimSession;
pub use sim_driver::{SimDriver, SimDriverError, SimRemote};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_server::{SimServer, SimServerConfig};
pub use sim_transport::{SimTransport, serve};
