//! Application layer for Parley
//!
//! Async orchestration around the sans-IO [`parley_client::Client`], written
//! once and shared by production and simulation.
//!
//! # Components
//!
//! - [`Driver`]: Trait for the text transport (WebSocket in production)
//! - [`Runtime`]: Single-task event loop that owns the client and the driver
//! - [`SessionHandle`]: Cloneable handle the UI uses to talk to the runtime
//! - [`SessionView`]: Read model published after every store change
//! - [`SystemEnv`]: Production [`parley_core::Environment`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod driver;
mod error;
mod handle;
mod runtime;
mod system_env;
mod view;
#[cfg(feature = "websocket")]
mod ws;

pub use driver::Driver;
pub use error::RuntimeError;
pub use handle::SessionHandle;
pub use runtime::{Runtime, RuntimeConfig};
pub use system_env::SystemEnv;
pub use view::SessionView;
#[cfg(feature = "websocket")]
pub use ws::{WsDriver, WsError, socket_url};
