//! Line-oriented operator console for Parley.
//!
//! Reads commands and messages from stdin, prints conversation activity to
//! stdout. All session logic lives in [`parley_app::Runtime`]; this crate
//! only parses input and renders [`parley_app::SessionView`] changes.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod command;
pub mod render;
pub mod session;

pub use command::{Command, CommandError};
pub use render::Console;
pub use session::{ConsoleError, run_session};
